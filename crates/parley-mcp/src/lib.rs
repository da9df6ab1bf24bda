pub mod client;
pub mod db;
pub mod error;
pub mod registry;
pub mod types;

pub use client::HttpToolClient;
pub use error::{McpError, Result};
pub use registry::ToolRegistry;
pub use types::{
    BoundTool, InvocationOutcome, ToolDefinition, ToolInvocation, ToolServer,
};
