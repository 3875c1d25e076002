pub mod builders;
pub mod fake_backend;
pub mod fake_executor;

pub use builders::{ConfigFileBuilder, ExecutionConfigBuilder, ProviderConfigBuilder};
pub use fake_backend::FakeClusterBackend;
pub use fake_executor::FakeTestExecutor;
