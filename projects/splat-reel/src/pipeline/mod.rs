// Pipeline stages and the coordinator that sequences them

pub mod compositor;
pub mod masking;
pub mod orchestrator;
pub mod reconstruct;
