//! Test utilities for runtime testing
