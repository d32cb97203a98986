// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The offload request queue and its worker thread.
//!
//! Any number of dataplane threads produce add/modify/delete requests;
//! a single dedicated worker consumes them and runs the hardware
//! driver. At most one request per flow is outstanding: producers
//! coalesce on the flow's in-progress bit. Per-flow causal order is
//! preserved; cross-flow ordering is not.

use super::flow::ActionList;
use super::flow::FlowHandle;
use super::netdev::DriverClass;
use super::netdev::FlowDriver;
use super::netdev::PortMap;
use super::offload;
use super::stats::OffloadCounters;
use crate::admin::AdminServer;
use crate::api::OffloadStatus;
use crate::api::Ufid;
use crate::ddi::sync::KCondvar;
use crate::ddi::sync::KMutex;
use crate::ExecCtx;
use crate::LogLevel;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;
use std::thread;
use std::thread::JoinHandle;

/// The operation carried by a request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OffloadOp {
    Add,
    Mod,
    Del,
}

/// One queued request. Holds a flow reference for the duration; a MOD
/// also carries a copy of the prior action list, because the live list
/// may be freed while the item sits in the queue.
pub struct OffloadItem {
    pub(crate) class: DriverClass,
    pub(crate) flow: Arc<FlowHandle>,
    pub(crate) op: OffloadOp,
    pub(crate) old_acts: Option<ActionList>,
}

/// Engine configuration, consumed once at initialization.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct OffloadConfig {
    /// The global hardware-offload switch. When off, put requests are
    /// dropped silently.
    pub enabled: bool,
    /// Where to listen for admin commands, if anywhere.
    pub admin_sock: Option<PathBuf>,
}

/// The offload queue and worker. One per process in production use;
/// see [`offload_init`].
pub struct OffloadQueue {
    pub(crate) ctx: Arc<ExecCtx>,
    pub(crate) driver: Arc<dyn FlowDriver>,
    pub(crate) ports: Arc<PortMap>,
    pub(crate) counters: OffloadCounters,

    /// Flows kept alive by programmed hardware state. An entry is
    /// added when a flow transitions to offloaded and removed by a
    /// successful DEL.
    pins: KMutex<BTreeMap<Ufid, Arc<FlowHandle>>>,

    list: KMutex<VecDeque<OffloadItem>>,
    cond: KCondvar,
    /// True strictly while the worker holds an item outside the
    /// mutex.
    processing: AtomicBool,
    exit: AtomicBool,
    /// The pause switch. Producers check it before enqueueing.
    accepting: AtomicBool,
    enabled: AtomicBool,
    thread: KMutex<Option<JoinHandle<()>>>,
    admin: KMutex<Option<AdminServer>>,
}

impl OffloadQueue {
    pub fn new(
        ctx: Arc<ExecCtx>,
        driver: Arc<dyn FlowDriver>,
        ports: Arc<PortMap>,
        config: &OffloadConfig,
    ) -> Arc<Self> {
        let q = Arc::new(Self {
            ctx,
            driver,
            ports: Arc::clone(&ports),
            counters: OffloadCounters::default(),
            pins: KMutex::new(BTreeMap::new()),
            list: KMutex::new(VecDeque::new()),
            cond: KCondvar::new(),
            processing: AtomicBool::new(false),
            exit: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
            enabled: AtomicBool::new(config.enabled),
            thread: KMutex::new(None),
            admin: KMutex::new(None),
        });

        if let Some(path) = &config.admin_sock {
            match AdminServer::spawn(path, ports) {
                Ok(srv) => *q.admin.lock() = Some(srv),
                Err(e) => q.ctx.log.log(
                    LogLevel::Warn,
                    &format!("admin socket {} failed: {}", path.display(), e),
                ),
            }
        }

        q.spawn_worker();
        q
    }

    fn spawn_worker(self: &Arc<Self>) {
        let q = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("hw-offload".to_string())
            .spawn(move || q.worker_main())
            .expect("failed to spawn hw-offload worker");
        *self.thread.lock() = Some(handle);
    }

    /// Toggle the global offload switch.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn counters(&self) -> &OffloadCounters {
        &self.counters
    }

    /// The admin socket path, when one was configured and bound.
    pub fn admin_sock(&self) -> Option<PathBuf> {
        self.admin.lock().as_ref().map(|srv| srv.path().to_path_buf())
    }

    /// Number of requests waiting in the queue.
    pub fn pending(&self) -> usize {
        self.list.lock().len()
    }

    /// Number of flows pinned by programmed hardware state.
    pub fn pinned(&self) -> usize {
        self.pins.lock().len()
    }

    pub(crate) fn pin_offloaded(&self, flow: &Arc<FlowHandle>) {
        self.pins.lock().insert(flow.ufid(), Arc::clone(flow));
    }

    pub(crate) fn unpin(&self, ufid: Ufid) {
        self.pins.lock().remove(&ufid);
    }

    fn alloc_item(
        &self,
        class: DriverClass,
        flow: &Arc<FlowHandle>,
        old_acts: Option<&ActionList>,
        op: OffloadOp,
    ) -> Option<OffloadItem> {
        let flow = flow.try_ref()?;
        Some(OffloadItem { class, flow, op, old_acts: old_acts.cloned() })
    }

    /// Queue an ADD or MOD request for `flow`.
    ///
    /// A MOD must pass the prior action list: the live list may be
    /// freed while the item waits, and an ingress MOD is resolved
    /// against what the flow used to do.
    pub fn queue_put(
        &self,
        class: DriverClass,
        flow: &Arc<FlowHandle>,
        old_acts: Option<&ActionList>,
        op: OffloadOp,
    ) {
        debug_assert!(op != OffloadOp::Del);

        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }

        if !self.accepting.load(Ordering::SeqCst) {
            return;
        }

        let mut list = self.list.lock();
        if flow.state().in_progress() {
            return;
        }

        let Some(item) = self.alloc_item(class, flow, old_acts, op) else {
            return;
        };
        flow.state().mark_in_progress();
        list.push_back(item);
        if !self.processing.load(Ordering::Acquire) {
            self.cond.notify_one();
        }
    }

    /// Queue a DEL request for `flow`.
    pub fn queue_del(&self, class: DriverClass, flow: &Arc<FlowHandle>) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }

        if !self.accepting.load(Ordering::SeqCst) {
            return;
        }

        let mut list = self.list.lock();
        if flow.state().in_progress() {
            return;
        }

        let Some(item) = self.alloc_item(class, flow, None, OffloadOp::Del)
        else {
            return;
        };
        flow.state().mark_in_progress();
        list.push_back(item);
        if !self.processing.load(Ordering::Acquire) {
            self.cond.notify_one();
        }
    }

    /// Spin until the worker is idle and the queue is empty,
    /// re-signalling the condvar as needed so the worker wakes to
    /// observe the empty queue.
    pub fn wait_done(&self) {
        loop {
            // Read the flag under the mutex: the worker flips it to
            // true before releasing the lock on a pop, so an empty
            // queue plus a false flag means truly idle.
            let list = self.list.lock();
            let process = self.processing.load(Ordering::Acquire);
            let target = if !process {
                if !list.is_empty() {
                    self.cond.notify_one();
                    true
                } else {
                    false
                }
            } else {
                false
            };
            drop(list);

            if process == target {
                break;
            }
            thread::yield_now();
        }
    }

    /// Stop accepting put requests and wait for the queue to drain.
    /// Returns the previous value, to be handed back to [`resume`].
    ///
    /// [`resume`]: Self::resume
    pub fn pause(&self) -> bool {
        if self
            .accepting
            .compare_exchange(
                true,
                false,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.wait_done();
            return true;
        }
        false
    }

    pub fn resume(&self, prev: bool) {
        self.accepting.store(prev, Ordering::SeqCst);
    }

    /// Ask the worker to exit, drain the queue, and join it.
    pub fn join(&self) {
        {
            let _list = self.list.lock();
            self.exit.store(true, Ordering::SeqCst);
            self.cond.notify_one();
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Spawn a fresh worker after a controlled [`join`].
    ///
    /// [`join`]: Self::join
    pub fn restart(self: &Arc<Self>) {
        self.exit.store(false, Ordering::SeqCst);
        self.spawn_worker();
    }

    fn worker_main(self: Arc<Self>) {
        loop {
            let mut list = self.list.lock();
            let item = loop {
                if self.exit.load(Ordering::SeqCst) {
                    drop(list);
                    self.drain();
                    self.ctx.log.log(LogLevel::Note, "hw-offload exit");
                    return;
                }

                if let Some(item) = list.pop_front() {
                    break item;
                }

                self.processing.store(false, Ordering::Release);
                list = self.cond.wait(list);
            };
            self.processing.store(true, Ordering::Release);
            drop(list);

            // Fetch the live actions here, not at enqueue time; the
            // item holds a flow reference, so the list fetched now
            // stays alive for the dispatch.
            let acts = item.flow.actions();
            let (op_name, ret) = match item.op {
                OffloadOp::Add => {
                    ("add", offload::offload_put(&self, &item, &acts))
                }
                OffloadOp::Mod => {
                    ("mod", offload::offload_put(&self, &item, &acts))
                }
                OffloadOp::Del => {
                    ("delete", offload::offload_del(&self, &item, &acts))
                }
            };

            match item.op {
                OffloadOp::Del => self.counters.dels.incr(1),
                _ if ret.is_ok() => self.counters.puts.incr(1),
                _ => self.counters.put_errors.incr(1),
            }

            self.ctx.log.log(
                LogLevel::Note,
                &format!(
                    "{} to {} netdev flow",
                    if ret.is_ok() { "succeed" } else { "failed" },
                    op_name
                ),
            );

            // Dropping the item releases its flow reference and any
            // captured prior actions.
        }
    }

    /// Dispose of everything left in the queue. An in-progress flow
    /// arriving here goes back to NONE.
    fn drain(&self) {
        let mut list = self.list.lock();
        while let Some(item) = list.pop_front() {
            item.flow.state().set(OffloadStatus::None);
            self.counters.drained.incr(1);
        }
    }
}

static OFFLOAD: OnceLock<Arc<OffloadQueue>> = OnceLock::new();

/// Initialize the process-wide offload engine. The first call builds
/// the queue and starts its worker; later calls return the existing
/// instance.
pub fn offload_init(
    ctx: Arc<ExecCtx>,
    driver: Arc<dyn FlowDriver>,
    ports: Arc<PortMap>,
    config: &OffloadConfig,
) -> Arc<OffloadQueue> {
    OFFLOAD
        .get_or_init(|| OffloadQueue::new(ctx, driver, ports, config))
        .clone()
}

/// The process-wide engine, if initialized.
pub fn offload_handle() -> Option<Arc<OffloadQueue>> {
    OFFLOAD.get().cloned()
}
