//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use ibsm_utils::task::IntervalTask;
use tokio::sync::mpsc::UnboundedSender;

//
// Subnet manager tasks diagram:
//
//                                  +--------------+
//                   mad_rx (1x) -> |              |
//              sweep_timer (1x) -> |              |
//               pacer_tick (1x) -> |   instance   | -> (1x) transport tx
//              sminfo_poll (1x) -> |              |
//              lease_sweep (1x) -> |              |
//                                  +--------------+
//

// Subnet manager inter-task message types.
pub mod messages {
    use serde::{Deserialize, Serialize};

    use crate::transport::RxMad;

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use super::*;

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub enum ProtocolMsg {
            MadRx(MadRxMsg),
            PacerTick(PacerTickMsg),
            SweepRequest(SweepRequestMsg),
            SminfoPoll(SminfoPollMsg),
            LeaseSweep(LeaseSweepMsg),
        }

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct MadRxMsg {
            pub rx: RxMad,
        }

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct PacerTickMsg {}

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct SweepRequestMsg {
            pub heavy: bool,
        }

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct SminfoPollMsg {}

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct LeaseSweepMsg {}
    }
}

// ===== subnet manager tasks =====

// Periodic sweep timer.
pub(crate) fn sweep_timer(
    interval: Duration,
    sweep_requestp: &UnboundedSender<messages::input::SweepRequestMsg>,
) -> IntervalTask {
    let sweep_requestp = sweep_requestp.clone();
    IntervalTask::new(interval, true, move || {
        let sweep_requestp = sweep_requestp.clone();
        async move {
            let _ = sweep_requestp
                .send(messages::input::SweepRequestMsg { heavy: false });
        }
    })
}

// Pacer deadline advance.
pub(crate) fn pacer_tick(
    pacer_tickp: &UnboundedSender<messages::input::PacerTickMsg>,
) -> IntervalTask {
    let pacer_tickp = pacer_tickp.clone();
    IntervalTask::new(Duration::from_millis(50), false, move || {
        let pacer_tickp = pacer_tickp.clone();
        async move {
            let _ = pacer_tickp.send(messages::input::PacerTickMsg {});
        }
    })
}

// Standby-state master polling timer.
pub(crate) fn sminfo_poll_timer(
    interval: Duration,
    sminfo_pollp: &UnboundedSender<messages::input::SminfoPollMsg>,
) -> IntervalTask {
    let sminfo_pollp = sminfo_pollp.clone();
    IntervalTask::new(interval, false, move || {
        let sminfo_pollp = sminfo_pollp.clone();
        async move {
            let _ = sminfo_pollp.send(messages::input::SminfoPollMsg {});
        }
    })
}

// Service record lease expiry sweep.
pub(crate) fn lease_sweep_timer(
    lease_sweepp: &UnboundedSender<messages::input::LeaseSweepMsg>,
) -> IntervalTask {
    let lease_sweepp = lease_sweepp.clone();
    IntervalTask::new(Duration::from_secs(1), false, move || {
        let lease_sweepp = lease_sweepp.clone();
        async move {
            let _ = lease_sweepp.send(messages::input::LeaseSweepMsg {});
        }
    })
}
