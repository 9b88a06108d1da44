//! Table-name resolution for the production schema vs. its `test_`-prefixed
//! mirror, selected once per process (see `HYDRA_TEST_MODE` in `hydra-cli`).

/// Which table set a connection should address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    test_mode: bool,
}

impl Schema {
    pub const fn production() -> Self {
        Self { test_mode: false }
    }

    pub const fn test_mode() -> Self {
        Self { test_mode: true }
    }

    pub const fn is_test_mode(self) -> bool {
        self.test_mode
    }

    pub const fn render_nodes(self) -> &'static str {
        if self.test_mode {
            "test_render_nodes"
        } else {
            "render_nodes"
        }
    }

    pub const fn jobs(self) -> &'static str {
        if self.test_mode { "test_jobs" } else { "jobs" }
    }

    pub const fn tasks(self) -> &'static str {
        if self.test_mode { "test_tasks" } else { "tasks" }
    }

    pub const fn capabilities(self) -> &'static str {
        if self.test_mode {
            "test_capabilities"
        } else {
            "capabilities"
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::production()
    }
}
