/// Settings consulted while decompiling a method. The value is immutable for the duration of a
/// session and shared by reference with every strategy, so there is no process-wide state.
#[derive(Clone, Debug)]
pub struct DecompilerConfig {
    /// When a nested region cannot be structured, replace it with a comment listing its raw
    /// opcodes instead of failing the whole method.
    pub print_opcodes_on_error: bool,
    /// Upper bound on how deeply `flatten` may recurse. Malformed exception tables can otherwise
    /// make the try/catch recognizer descend without bound.
    pub max_nesting_depth: usize,
    /// Whether statement post-processors run after the tree has been built.
    pub run_post_processors: bool,
}

impl Default for DecompilerConfig {
    fn default() -> Self {
        Self {
            print_opcodes_on_error: false,
            max_nesting_depth: 256,
            run_post_processors: true,
        }
    }
}

impl DecompilerConfig {
    pub fn with_opcodes_on_error(mut self, enabled: bool) -> Self {
        self.print_opcodes_on_error = enabled;
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }
}
