pub mod readings;

pub use readings::ReadingsRepository;
