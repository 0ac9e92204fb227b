/// Knobs for building graphs
#[derive(Clone, Debug)]
pub struct Settings {
    /// Maximum number of live nodes in a graph
    ///
    /// Checked after every instruction. Going over is a bailout, which keeps pathologically large
    /// methods from eating all of the memory.
    pub max_graph_nodes: usize,

    /// Turn `invokevirtual` and `invokeinterface` into direct calls when the target is known
    pub devirtualize: bool,

    /// Run dead code elimination once the graph is built
    pub eliminate_dead_code: bool,

    /// Check that popped values have the kind the instruction expects
    ///
    /// Verified bytecode always passes this check, so it only catches builder bugs. It is on by
    /// default in debug builds.
    pub check_stack_kinds: bool,
}

impl Settings {
    pub const DEFAULT_MAX_GRAPH_NODES: usize = 16384;

    pub fn new() -> Settings {
        Settings {
            max_graph_nodes: Settings::DEFAULT_MAX_GRAPH_NODES,
            devirtualize: true,
            eliminate_dead_code: true,
            check_stack_kinds: cfg!(debug_assertions),
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}
