use super::event::Event;

/// Events staged by one unit of work, waiting to be saved with the aggregate.
#[derive(Debug, Default, Clone)]
pub struct EventBuffer {
    events: Vec<Event>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self {
            events: Vec::with_capacity(1),
        }
    }

    pub fn add(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Drains every staged event, in the order they were added.
    pub fn collect(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
