pub mod conductor;
pub mod node;

// Re-export node types
pub use node::*;
// Re-export membership types
pub use conductor::*;
