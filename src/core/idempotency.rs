use crate::domain::ports::IdGenerator;
use uuid::Uuid;

/// Random v4 UUIDs, prefixed so batch and item ids are told apart in provider dashboards.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidKeyGenerator;

impl UuidKeyGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl IdGenerator for UuidKeyGenerator {
    fn new_batch_id(&self) -> String {
        format!("batch_{}", Uuid::new_v4().simple())
    }

    fn new_item_id(&self) -> String {
        format!("item_{}", Uuid::new_v4().simple())
    }
}
