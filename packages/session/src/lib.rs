// ABOUTME: Execution session orchestration for agent runs
// ABOUTME: Ties sandbox lifecycle, loop detection, and status reporting into one run loop

pub mod coordinator;
pub mod session;

pub use coordinator::{Coordinator, CoordinatorError, HttpCoordinator, StatusDispatcher};
pub use session::{ExecutionSession, SessionError};
