//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::{Pkey, PortNum};

use crate::collections::{NodeIndex, SwitchIndex};
use crate::error::Error;
use crate::instance::SmUpView;
use crate::packet::smp::{
    NodeDescription, PkeyTableBlock, SlToVlTable, VlArbTableBlock,
};

// NodeDescription receiver.
pub(crate) fn process_node_description(
    sm: &mut SmUpView<'_>,
    node_idx: NodeIndex,
    nd: NodeDescription,
) -> Result<(), Error> {
    sm.subnet.nodes[node_idx].description = nd.description;
    Ok(())
}

// P_Key table receiver: flattens the block into the port's key list.
pub(crate) fn process_pkey_table(
    sm: &mut SmUpView<'_>,
    node_idx: NodeIndex,
    port_num: PortNum,
    block: u16,
    set: bool,
    pkeys: PkeyTableBlock,
) -> Result<(), Error> {
    let node = &mut sm.subnet.nodes[node_idx];
    let guid = node.guid;
    let physp = node
        .physp_mut(port_num)
        .ok_or(Error::PortNumNotFound(guid, port_num))?;

    let entries = pkeys
        .pkeys
        .iter()
        .filter(|pkey| **pkey != 0)
        .map(|pkey| Pkey(*pkey));
    if block == 0 && !set {
        physp.pkeys = entries.collect();
    } else {
        physp.pkeys.extend(entries);
        physp.pkeys.dedup();
    }
    Ok(())
}

// SL-to-VL table receiver.
pub(crate) fn process_sl2vl(
    sm: &mut SmUpView<'_>,
    node_idx: NodeIndex,
    _in_port: PortNum,
    out_port: PortNum,
    _set: bool,
    slvl: SlToVlTable,
) -> Result<(), Error> {
    let node = &mut sm.subnet.nodes[node_idx];
    let guid = node.guid;
    let physp = node
        .physp_mut(out_port)
        .ok_or(Error::PortNumNotFound(guid, out_port))?;
    physp.sl2vl = Some(slvl);
    Ok(())
}

// VL arbitration table receiver.
pub(crate) fn process_vl_arb(
    sm: &mut SmUpView<'_>,
    node_idx: NodeIndex,
    port_num: PortNum,
    _block: u32,
    _set: bool,
    vlarb: VlArbTableBlock,
) -> Result<(), Error> {
    let node = &mut sm.subnet.nodes[node_idx];
    let guid = node.guid;
    let physp = node
        .physp_mut(port_num)
        .ok_or(Error::PortNumNotFound(guid, port_num))?;
    physp.vl_arb = Some(vlarb);
    Ok(())
}

// LFT block write acknowledgement.
pub(crate) fn process_lft_ack(
    _sm: &mut SmUpView<'_>,
    _switch_idx: SwitchIndex,
    _block: u16,
) -> Result<(), Error> {
    // The computed table was committed at emission time; the response
    // only confirms delivery.
    Ok(())
}

// MFT block write acknowledgement.
pub(crate) fn process_mft_ack(
    _sm: &mut SmUpView<'_>,
    _switch_idx: SwitchIndex,
    _position: u8,
    _block: u16,
) -> Result<(), Error> {
    Ok(())
}
