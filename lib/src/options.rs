/// Buffer sizing used for every native query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// First buffer size tried. Doubled on every "buffer too small" reply.
    pub initial_buffer_size: usize,
    /// Hard ceiling for buffer growth.
    pub max_buffer_size: usize,
}

pub const DEFAULT_INITIAL_BUFFER_SIZE: usize = 256;
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            initial_buffer_size: DEFAULT_INITIAL_BUFFER_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

impl QueryOptions {
    pub fn with_initial_buffer_size(mut self, size: usize) -> Self {
        self.initial_buffer_size = size.max(1);
        self
    }

    pub fn with_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Initial size for a query whose reply is at least `floor` bytes.
    pub(crate) fn initial_for(&self, floor: usize) -> usize {
        self.initial_buffer_size
            .max(floor)
            .max(1)
            .min(self.max_buffer_size.max(1))
    }
}
