//! Identity types for the graph engine.
//!
//! All IDs are newtypes over `u32` that serve as direct array indices into
//! their respective arenas, providing O(1) lookup. Arenas only grow during
//! the declare phase, so an ID stays valid for the lifetime of its graph.

use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

arena_id!(
    /// Index into `Graph::nodes`.
    NodeId
);

arena_id!(
    /// Index into `Graph::pads`.
    PadId
);

arena_id!(
    /// Index into the graph's boundary parameter list.
    ///
    /// Every peerless pad is promoted to one graph parameter at
    /// materialization; the backend correlates submissions and completions
    /// by this index.
    ParamId
);

arena_id!(
    /// Backend-issued handle of a concrete execution unit.
    KernelHandle
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id() {
        let id = NodeId(42);
        assert_eq!(id.index(), 42);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", PadId(3)), "PadId(3)");
        assert_eq!(format!("{}", ParamId(7)), "ParamId(7)");
    }

    #[test]
    fn test_ids_order_by_index() {
        let mut ids = vec![PadId(5), PadId(1), PadId(3)];
        ids.sort();
        assert_eq!(ids, vec![PadId(1), PadId(3), PadId(5)]);
    }
}
