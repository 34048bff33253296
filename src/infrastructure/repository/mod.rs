pub mod memory;

pub use memory::InMemoryStationRepository;
