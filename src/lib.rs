//! Workspace root package. No functionality; exists to host workspace-level dev tooling.
