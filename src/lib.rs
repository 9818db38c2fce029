//! Workspace-level integration tests for calcflow. See `tests/`.
