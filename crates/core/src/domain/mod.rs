pub mod tool_result;
pub mod workspace;
