use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bsc_config::SharedConfig;
use bsc_core::{BscTime, bsc_entities::BscEntity};
use bsc_saps::SapMsg;

use crate::BscEntityTrait;

pub struct MessageQueue {
    messages: VecDeque<SapMsg>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self { messages: VecDeque::new() }
    }

    pub fn push_back(&mut self, message: SapMsg) {
        self.messages.push_back(message);
    }

    pub fn pop_front(&mut self) -> Option<SapMsg> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MessageRouter {
    config: SharedConfig,
    entities: HashMap<BscEntity, Box<dyn BscEntityTrait>>,
    msg_queue: MessageQueue,

    /// Current BSC time, advanced by tick_ms on every tick
    now: BscTime,
}

impl MessageRouter {
    pub fn new(config: SharedConfig) -> Self {
        Self { entities: HashMap::new(), msg_queue: MessageQueue::new(), config, now: BscTime::default() }
    }

    pub fn set_time(&mut self, now: BscTime) {
        self.now = now;
    }

    pub fn now(&self) -> BscTime {
        self.now
    }

    pub fn register_entity(&mut self, entity: Box<dyn BscEntityTrait>) {
        let comp_type = entity.entity();
        tracing::debug!("register_entity {:?}", comp_type);
        self.entities.insert(comp_type, entity);
    }

    /// Returns a mut ref to a component of the requested type
    pub fn get_entity(&mut self, comp: BscEntity) -> Option<&mut dyn BscEntityTrait> {
        self.entities.get_mut(&comp).map(|entity| entity.as_mut())
    }

    pub fn submit_message(&mut self, message: SapMsg) {
        tracing::debug!("submit_message {:?}: {:?} -> {:?}", message.get_sap(), message.get_source(), message.get_dest());
        self.msg_queue.push_back(message);
    }

    pub fn deliver_message(&mut self) {
        let Some(message) = self.msg_queue.pop_front() else {
            return;
        };

        tracing::debug!(
            "deliver_message: got {:?} {}: {:?} -> {:?}",
            message.get_sap(),
            message.msg,
            message.get_source(),
            message.get_dest()
        );

        let dest = *message.get_dest();
        if let Some(entity) = self.entities.get_mut(&dest) {
            entity.rx_prim(&mut self.msg_queue, message);
        } else {
            tracing::warn!(
                "deliver_message: entity {:?} not found for {:?} {}: {:?} -> {:?}",
                dest,
                message.get_sap(),
                message.msg,
                message.get_source(),
                message.get_dest()
            );
        }
    }

    pub fn deliver_all_messages(&mut self) {
        while !self.msg_queue.is_empty() {
            self.deliver_message();
        }
    }

    pub fn get_msgqueue_len(&self) -> usize {
        self.msg_queue.len()
    }

    pub fn tick_start(&mut self) {
        tracing::trace!("--- tick {} ----------------------------", self.now);
        for entity in self.entities.values_mut() {
            entity.tick_start(&mut self.msg_queue, self.now);
        }
    }

    pub fn tick_end(&mut self) {
        for entity in self.entities.values_mut() {
            entity.tick_end(&mut self.msg_queue, self.now);
        }
        self.deliver_all_messages();

        self.now = self.now.add_ms(self.config.config().tick_ms);
    }

    /// Runs the full stack either forever or for a specified number of ticks.
    /// With a `running` flag, ticks are paced in real time and the loop ends
    /// once the flag is cleared.
    pub fn run_stack(&mut self, num_ticks: Option<usize>, running: Option<Arc<AtomicBool>>) {
        let tick = Duration::from_millis(self.config.config().tick_ms);
        let mut ticks: usize = 0;

        loop {
            let started = Instant::now();

            self.tick_start();
            while self.get_msgqueue_len() > 0 {
                self.deliver_all_messages();
            }
            self.tick_end();

            ticks += 1;
            if let Some(num_ticks) = num_ticks {
                if ticks >= num_ticks {
                    break;
                }
            }
            if let Some(running) = &running {
                if !running.load(Ordering::SeqCst) {
                    tracing::info!("run_stack: stopping after {} ticks", ticks);
                    break;
                }
                if let Some(rest) = tick.checked_sub(started.elapsed()) {
                    std::thread::sleep(rest);
                }
            }
        }
    }
}
