//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use ibsm_utils::ib::{DrPath, Gid, Guid, PortNum};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::collections::{NodeIndex, SwitchIndex};
use crate::config::SmConfig;
use crate::packet::Mad;
use crate::packet::smp::SmInfoControl;
use crate::transport::{MadAddr, TxMad};

// Why a management transaction was issued; carried through the pacer and
// returned with the completion so the owning receiver can resume.
#[derive(Clone, Debug)]
pub enum MadContext {
    // Discovery reads.
    NodeInfo {
        path: DrPath,
        // The local switch port the probe went out of, when probing a
        // neighbor.
        via: Option<(NodeIndex, PortNum)>,
    },
    NodeDescription {
        node_idx: NodeIndex,
    },
    PortInfo {
        node_idx: NodeIndex,
        port_num: PortNum,
        set: bool,
    },
    SwitchInfo {
        node_idx: NodeIndex,
        set: bool,
    },
    PkeyTable {
        node_idx: NodeIndex,
        port_num: PortNum,
        block: u16,
        set: bool,
    },
    SlToVl {
        node_idx: NodeIndex,
        in_port: PortNum,
        out_port: PortNum,
        set: bool,
    },
    VlArb {
        node_idx: NodeIndex,
        port_num: PortNum,
        block: u32,
        set: bool,
    },
    // Routing writes.
    Lft {
        switch_idx: SwitchIndex,
        block: u16,
    },
    Mft {
        switch_idx: SwitchIndex,
        position: u8,
        block: u16,
    },
    // Election traffic.
    SmInfo {
        remote_guid: Guid,
        control: Option<SmInfoControl>,
    },
    // Subscriber reports.
    Report {
        subscriber_gid: Gid,
    },
}

// Completion disposition of a transaction.
#[derive(Debug)]
pub enum CompletionStatus {
    Response(Mad),
    Timeout,
    Abort,
}

// A finished transaction handed back to its originating receiver.
#[derive(Debug)]
pub struct Completion {
    pub context: MadContext,
    pub status: CompletionStatus,
}

#[derive(Debug)]
struct WireEntry {
    tx_mad: TxMad,
    context: MadContext,
    retries_left: u32,
    deadline: Instant,
}

// The transaction pacer: bounds outstanding management datagrams, retries
// on timeout and matches responses to waiters by transaction id.
//
// Transactions within the primary window get the configured transaction
// timeout; the overflow window up to `max_wire_smps2` runs with the
// extended timeout. Anything beyond that queues until a slot frees up.
#[derive(Debug)]
pub struct Pacer {
    max_wire: usize,
    max_wire2: usize,
    timeout: Duration,
    ext_timeout: Duration,
    retries: u32,
    next_tid: u64,
    wire: HashMap<u64, WireEntry>,
    queue: VecDeque<(TxMad, MadContext)>,
    tx: UnboundedSender<TxMad>,
    // Responses whose transaction id matched nothing.
    pub unknown_tid_drops: u64,
    // Timeouts seen since the last sweep started.
    pub sweep_timeouts: u32,
}

// ===== impl Pacer =====

impl Pacer {
    pub fn new(config: &SmConfig, tx: UnboundedSender<TxMad>) -> Pacer {
        Pacer {
            max_wire: config.max_wire_smps.max(1) as usize,
            max_wire2: config.max_wire_smps2.max(config.max_wire_smps.max(1))
                as usize,
            timeout: Duration::from_millis(config.transaction_timeout.into()),
            ext_timeout: Duration::from_millis(config.max_smps_timeout.into()),
            retries: config.transaction_retries,
            next_tid: 1,
            wire: HashMap::new(),
            queue: VecDeque::new(),
            tx,
            unknown_tid_drops: 0,
            sweep_timeouts: 0,
        }
    }

    pub fn reconfigure(&mut self, config: &SmConfig) {
        self.max_wire = config.max_wire_smps.max(1) as usize;
        self.max_wire2 =
            config.max_wire_smps2.max(config.max_wire_smps.max(1)) as usize;
        self.timeout =
            Duration::from_millis(config.transaction_timeout.into());
        self.ext_timeout =
            Duration::from_millis(config.max_smps_timeout.into());
        self.retries = config.transaction_retries;
    }

    // Submits a transaction. The datagram is stamped with a fresh
    // transaction id and either dispatched immediately or queued behind
    // the in-flight window.
    pub fn send(&mut self, mut mad: Mad, dest: MadAddr, context: MadContext) {
        mad.hdr.tid = self.next_tid;
        self.next_tid += 1;
        let tx_mad = TxMad::new(dest, mad, true);

        if self.wire.len() < self.max_wire2 {
            self.dispatch(tx_mad, context);
        } else {
            self.queue.push_back((tx_mad, context));
        }
    }

    // Sends a fire-and-forget datagram (responses), bypassing the window.
    pub fn send_response(&self, mad: Mad, dest: MadAddr) {
        let _ = self.tx.send(TxMad::new(dest, mad, false));
    }

    fn dispatch(&mut self, tx_mad: TxMad, context: MadContext) {
        // Transactions past the primary window run with the extended
        // timeout.
        let timeout = if self.wire.len() < self.max_wire {
            self.timeout
        } else {
            self.ext_timeout
        };
        let tid = tx_mad.mad.hdr.tid;
        let _ = self.tx.send(tx_mad.clone());
        self.wire.insert(
            tid,
            WireEntry {
                tx_mad,
                context,
                retries_left: self.retries,
                deadline: Instant::now() + timeout,
            },
        );
    }

    // Matches a response to its waiter. Unknown transaction ids are
    // dropped and counted.
    pub fn complete(&mut self, mad: Mad) -> Option<Completion> {
        let tid = mad.hdr.tid;
        let Some(entry) = self.wire.remove(&tid) else {
            self.unknown_tid_drops += 1;
            debug!(%tid, "dropped response with unknown transaction id");
            return None;
        };
        self.pump();
        Some(Completion {
            context: entry.context,
            status: CompletionStatus::Response(mad),
        })
    }

    // Advances deadlines: expired entries are re-sent with the same
    // transaction id until their retries run out, then fail with Timeout.
    pub fn tick(&mut self, now: Instant) -> Vec<Completion> {
        let mut completions = Vec::new();
        let expired: Vec<u64> = self
            .wire
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(tid, _)| *tid)
            .collect();

        for tid in expired {
            let entry = self.wire.get_mut(&tid).unwrap();
            if entry.retries_left > 0 {
                entry.retries_left -= 1;
                entry.deadline = now + self.timeout;
                let _ = self.tx.send(entry.tx_mad.clone());
            } else {
                let entry = self.wire.remove(&tid).unwrap();
                self.sweep_timeouts += 1;
                completions.push(Completion {
                    context: entry.context,
                    status: CompletionStatus::Timeout,
                });
            }
        }

        self.pump();
        completions
    }

    // Aborts everything in flight and queued.
    pub fn abort_all(&mut self) -> Vec<Completion> {
        let mut completions: Vec<_> = self
            .wire
            .drain()
            .map(|(_, entry)| Completion {
                context: entry.context,
                status: CompletionStatus::Abort,
            })
            .collect();
        completions.extend(self.queue.drain(..).map(|(_, context)| {
            Completion {
                context,
                status: CompletionStatus::Abort,
            }
        }));
        completions
    }

    // Moves queued transactions onto the wire while the window has room.
    fn pump(&mut self) {
        while self.wire.len() < self.max_wire2 {
            let Some((tx_mad, context)) = self.queue.pop_front() else {
                break;
            };
            self.dispatch(tx_mad, context);
        }
    }

    pub fn outstanding(&self) -> usize {
        self.wire.len() + self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.wire.is_empty() && self.queue.is_empty()
    }

    pub fn start_sweep_accounting(&mut self) {
        self.sweep_timeouts = 0;
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::packet::smp::ATTR_NODE_INFO;
    use crate::packet::{MadBody, MadHeader, Method, MgmtClass};
    use crate::packet::smp::Smp;

    fn probe_mad() -> Mad {
        Mad {
            hdr: MadHeader::request(
                MgmtClass::SubnDirectedRoute,
                Method::Get,
                ATTR_NODE_INFO,
                0,
                0,
            ),
            body: MadBody::Smp(Smp {
                m_key: 0,
                dr: None,
                attr: None,
            }),
        }
    }

    fn test_pacer(max_wire: u32) -> (Pacer, mpsc::UnboundedReceiver<TxMad>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut config = SmConfig::default();
        config.max_wire_smps = max_wire;
        config.max_wire_smps2 = max_wire;
        config.transaction_retries = 1;
        (Pacer::new(&config, tx), rx)
    }

    #[test]
    fn window_bounds_outstanding() {
        let (mut pacer, mut rx) = test_pacer(2);
        for _ in 0..5 {
            pacer.send(
                probe_mad(),
                MadAddr::Dr(DrPath::local()),
                MadContext::NodeInfo {
                    path: DrPath::local(),
                    via: None,
                },
            );
        }
        // Only the window's worth hit the wire.
        let mut sent = 0;
        while rx.try_recv().is_ok() {
            sent += 1;
        }
        assert_eq!(sent, 2);
        assert_eq!(pacer.outstanding(), 5);
    }

    #[test]
    fn response_completes_and_pumps() {
        let (mut pacer, mut rx) = test_pacer(1);
        pacer.send(
            probe_mad(),
            MadAddr::Dr(DrPath::local()),
            MadContext::NodeInfo {
                path: DrPath::local(),
                via: None,
            },
        );
        pacer.send(
            probe_mad(),
            MadAddr::Dr(DrPath::local()),
            MadContext::NodeInfo {
                path: DrPath::local(),
                via: None,
            },
        );

        let first = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());

        // Completing the first transaction pulls the queued one onto the
        // wire.
        let mut resp = probe_mad();
        resp.hdr.tid = first.mad.hdr.tid;
        resp.hdr.method = Method::GetResp;
        assert!(pacer.complete(resp).is_some());
        assert!(rx.try_recv().is_ok());
        assert_eq!(pacer.outstanding(), 1);
    }

    #[test]
    fn unknown_tid_dropped() {
        let (mut pacer, _rx) = test_pacer(1);
        let mut resp = probe_mad();
        resp.hdr.tid = 999;
        assert!(pacer.complete(resp).is_none());
        assert_eq!(pacer.unknown_tid_drops, 1);
    }

    #[test]
    fn timeout_after_retries() {
        let (mut pacer, mut rx) = test_pacer(1);
        pacer.send(
            probe_mad(),
            MadAddr::Dr(DrPath::local()),
            MadContext::NodeInfo {
                path: DrPath::local(),
                via: None,
            },
        );
        let _ = rx.try_recv();

        let later = Instant::now() + Duration::from_secs(3600);
        // First expiry re-sends with the same tid.
        let completions = pacer.tick(later);
        assert!(completions.is_empty());
        let resent = rx.try_recv().unwrap();
        assert_eq!(resent.mad.hdr.tid, 1);

        // Second expiry exhausts the retries.
        let completions = pacer.tick(later + Duration::from_secs(3600));
        assert_eq!(completions.len(), 1);
        assert!(matches!(
            completions[0].status,
            CompletionStatus::Timeout
        ));
        assert_eq!(pacer.sweep_timeouts, 1);
        assert!(pacer.is_idle());
    }
}
