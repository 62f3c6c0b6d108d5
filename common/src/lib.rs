//! Shared utilities for the v2t workspace.

pub mod dirs;
