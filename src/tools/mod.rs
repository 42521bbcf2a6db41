pub mod credentials;
pub mod echo;
pub mod registry;
pub mod status;

pub use credentials::{CredentialLookup, EnvCredentials, InMemoryCredentials};
pub use echo::EchoTool;
pub use registry::{Tool, ToolCall, ToolRegistry, ToolResult};
pub use status::{ToolStatus, ToolStatusChecker, ToolStatusInfo};
