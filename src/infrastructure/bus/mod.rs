pub mod local;

pub use local::LocalMessageBus;
