// Application layer: long-running drivers built on top of the core engine.

pub mod scheduler;
