//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use ibsm_utils::task::IntervalTask;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::debug_span;

use crate::config::SmConfig;
use crate::debug::Debug;
use crate::election::ElectionState;
use crate::error::Error;
use crate::packet::smp::{ATTR_SM_INFO, SmpAttr};
use crate::packet::{Mad, MadBody, Method, MgmtClass};
use crate::pacer::Pacer;
use crate::sa;
use crate::state_mgr::SweepState;
use crate::subnet::Subnet;
use crate::tasks;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    LeaseSweepMsg, PacerTickMsg, SminfoPollMsg, SweepRequestMsg,
};
use crate::transport::{MadTransport, RxMad, TransportError};
use crate::sa::service as service_expiry;
use crate::{discovery, election, inform, state_mgr};

// Why the instance stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitReason {
    Shutdown,
    FatalDuplicateGuid,
}

// Senders for every protocol input channel.
#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // Datagrams from the transport.
    pub mad_rx: UnboundedSender<RxMad>,
    // Pacer deadline ticks.
    pub pacer_tick: UnboundedSender<PacerTickMsg>,
    // Sweep requests (periodic timer or explicit).
    pub sweep_request: UnboundedSender<SweepRequestMsg>,
    // Standby master polling ticks.
    pub sminfo_poll: UnboundedSender<SminfoPollMsg>,
    // Service lease expiry ticks.
    pub lease_sweep: UnboundedSender<LeaseSweepMsg>,
}

// Receivers for every protocol input channel.
#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub mad_rx: UnboundedReceiver<RxMad>,
    pub pacer_tick: UnboundedReceiver<PacerTickMsg>,
    pub sweep_request: UnboundedReceiver<SweepRequestMsg>,
    pub sminfo_poll: UnboundedReceiver<SminfoPollMsg>,
    pub lease_sweep: UnboundedReceiver<LeaseSweepMsg>,
}

// The subnet manager instance: configuration, the subnet model behind
// its reader/writer lock, the transaction pacer and the orchestration
// state machines.
pub struct SubnetManager {
    pub config: SmConfig,
    pub subnet: Arc<RwLock<Subnet>>,
    pub pacer: Pacer,
    pub sweep: SweepState,
    pub election: ElectionState,
    pub tx: ProtocolInputChannelsTx,
    // Long-lived timer tasks; dropped on teardown.
    sweep_timer: Option<IntervalTask>,
    _pacer_tick: IntervalTask,
    _lease_sweep: IntervalTask,
}

// A borrowed view over the running instance handed to receivers. The
// subnet reference is held under the exclusive writer lock for the
// duration of a single message handler, never across a suspension.
pub struct SmUpView<'a> {
    pub config: &'a SmConfig,
    pub subnet: &'a mut Subnet,
    pub pacer: &'a mut Pacer,
    pub sweep: &'a mut SweepState,
    pub election: &'a mut ElectionState,
    pub tx: &'a ProtocolInputChannelsTx,
}

// ===== impl SubnetManager =====

impl SubnetManager {
    // Creates the input channel pair.
    pub fn protocol_input_channels()
    -> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
        let (mad_rx_tx, mad_rx_rx) = mpsc::unbounded_channel();
        let (pacer_tick_tx, pacer_tick_rx) = mpsc::unbounded_channel();
        let (sweep_request_tx, sweep_request_rx) = mpsc::unbounded_channel();
        let (sminfo_poll_tx, sminfo_poll_rx) = mpsc::unbounded_channel();
        let (lease_sweep_tx, lease_sweep_rx) = mpsc::unbounded_channel();
        (
            ProtocolInputChannelsTx {
                mad_rx: mad_rx_tx,
                pacer_tick: pacer_tick_tx,
                sweep_request: sweep_request_tx,
                sminfo_poll: sminfo_poll_tx,
                lease_sweep: lease_sweep_tx,
            },
            ProtocolInputChannelsRx {
                mad_rx: mad_rx_rx,
                pacer_tick: pacer_tick_rx,
                sweep_request: sweep_request_rx,
                sminfo_poll: sminfo_poll_rx,
                lease_sweep: lease_sweep_rx,
            },
        )
    }

    // Binds the transport and assembles the instance. Initialization
    // happens before any task is spawned.
    pub fn new(
        mut config: SmConfig,
        transport: &mut dyn MadTransport,
        tx: ProtocolInputChannelsTx,
    ) -> Result<SubnetManager, TransportError> {
        if config.port_guid.is_zero() {
            config.port_guid = transport.default_port_guid();
        }
        let mad_tx = transport.bind(config.port_guid, tx.mad_rx.clone())?;

        let mut subnet = Subnet::new(&config);
        if let Some(path) = &config.partition_config_file {
            match crate::partition::load_partitions(path) {
                Ok(partitions) => {
                    for partition in partitions {
                        subnet
                            .partitions
                            .insert(partition.pkey.base(), partition);
                    }
                }
                Err(error) => error.log(),
            }
        }
        let pacer = Pacer::new(&config, mad_tx);

        let sweep_timer = (config.sweep_interval > 0).then(|| {
            tasks::sweep_timer(
                Duration::from_secs(config.sweep_interval.into()),
                &tx.sweep_request,
            )
        });
        let pacer_tick = tasks::pacer_tick(&tx.pacer_tick);
        let lease_sweep = tasks::lease_sweep_timer(&tx.lease_sweep);

        Debug::InstanceStart.log();
        Ok(SubnetManager {
            config,
            subnet: Arc::new(RwLock::new(subnet)),
            pacer,
            sweep: SweepState::default(),
            election: ElectionState::default(),
            tx,
            sweep_timer,
            _pacer_tick: pacer_tick,
            _lease_sweep: lease_sweep,
        })
    }

    // Runs one handler under the exclusive writer lock.
    fn with_view<R>(
        &mut self,
        f: impl FnOnce(&mut SmUpView<'_>) -> R,
    ) -> R {
        let mut subnet = self.subnet.write().unwrap();
        let mut view = SmUpView {
            config: &self.config,
            subnet: &mut subnet,
            pacer: &mut self.pacer,
            sweep: &mut self.sweep,
            election: &mut self.election,
            tx: &self.tx,
        };
        f(&mut view)
    }

    // Main event loop: demultiplexes the typed input channels to their
    // handlers until shutdown or a fatal condition.
    pub async fn event_loop(
        &mut self,
        mut channels_rx: ProtocolInputChannelsRx,
        mut shutdown_rx: UnboundedReceiver<()>,
    ) -> ExitReason {
        let span = debug_span!("subnet-manager");
        let _span_guard = span.enter();

        // Seed the first sweep.
        let _ = self
            .tx
            .sweep_request
            .send(SweepRequestMsg { heavy: true });

        loop {
            let msg = tokio::select! {
                Some(rx) = channels_rx.mad_rx.recv() => {
                    ProtocolInputMsg::MadRx(
                        tasks::messages::input::MadRxMsg { rx },
                    )
                }
                Some(msg) = channels_rx.pacer_tick.recv() => {
                    ProtocolInputMsg::PacerTick(msg)
                }
                Some(msg) = channels_rx.sweep_request.recv() => {
                    ProtocolInputMsg::SweepRequest(msg)
                }
                Some(msg) = channels_rx.sminfo_poll.recv() => {
                    ProtocolInputMsg::SminfoPoll(msg)
                }
                Some(msg) = channels_rx.lease_sweep.recv() => {
                    ProtocolInputMsg::LeaseSweep(msg)
                }
                _ = shutdown_rx.recv() => {
                    Debug::InstanceStop.log();
                    return ExitReason::Shutdown;
                }
            };

            self.process_protocol_msg(msg);

            if self.sweep.fatal_dup_guid && self.config.exit_on_fatal {
                return ExitReason::FatalDuplicateGuid;
            }
        }
    }

    // Dispatches one protocol input message.
    pub fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        self.with_view(|sm| {
            match msg {
                ProtocolInputMsg::MadRx(msg) => {
                    process_mad_rx(sm, msg.rx);
                }
                ProtocolInputMsg::PacerTick(_) => {
                    let completions = sm.pacer.tick(Instant::now());
                    for completion in completions {
                        discovery::process_completion(sm, completion);
                    }
                }
                ProtocolInputMsg::SweepRequest(msg) => {
                    state_mgr::request_sweep(sm, msg.heavy);
                }
                ProtocolInputMsg::SminfoPoll(_) => {
                    election::process_poll_tick(sm);
                }
                ProtocolInputMsg::LeaseSweep(_) => {
                    service_expiry::expire_leases(sm);
                }
            }
            // Advance the sweep whenever the wire drained.
            state_mgr::process_idle(sm);
        });
    }

    // Ordered teardown: stop the sweeper, stop the election poller,
    // drain the pacer, release the transport binding.
    pub fn shutdown(mut self, transport: &mut dyn MadTransport) {
        self.sweep_timer = None;
        self.election.poll_task = None;
        let _ = self.pacer.abort_all();
        transport.unbind();
    }
}

// ===== datagram input =====

pub(crate) fn process_mad_rx(sm: &mut SmUpView<'_>, rx: RxMad) {
    let mad = match rx.mad {
        Ok(mad) => mad,
        Err(error) => {
            // Malformed datagrams are logged and dropped.
            Error::MadInput(error).log();
            return;
        }
    };

    // Responses complete pacer transactions.
    if mad.hdr.method.is_response() {
        if let Some(completion) = sm.pacer.complete(mad) {
            discovery::process_completion(sm, completion);
        }
        return;
    }

    match mad.hdr.mgmt_class {
        MgmtClass::SubnAdm => {
            sa::process_request(sm, rx.src_lid, rx.src_gid, &mad);
        }
        MgmtClass::SubnLid | MgmtClass::SubnDirectedRoute => {
            process_smp_request(sm, mad);
        }
        MgmtClass::Performance => (),
    }
}

fn process_smp_request(sm: &mut SmUpView<'_>, mad: Mad) {
    match (mad.hdr.method, mad.hdr.attr_id) {
        (Method::Get, ATTR_SM_INFO) => {
            election::process_sminfo_get(sm, &mad);
        }
        (Method::Set, ATTR_SM_INFO) => {
            election::process_sminfo_set(sm, &mad);
        }
        (Method::Trap, _) => {
            let MadBody::Smp(smp) = &mad.body else {
                return;
            };
            if let Some(SmpAttr::Notice(notice)) = &smp.attr {
                inform::process_trap(sm, notice.clone());
            }
        }
        (method, attr_id) => {
            tracing::warn!(
                ?method,
                attr_id,
                "unsupported SMP request dropped"
            );
        }
    }
}
