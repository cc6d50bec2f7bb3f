//! Identifiers assigned by the external scene graph.

use std::fmt;

macro_rules! node_ids {
    ($($(#[$meta:meta])* $name:ident => $prefix:literal;)*) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
            pub struct $name(pub u64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, concat!($prefix, "#{}"), self.0)
                }
            }
        )*
    };
}

node_ids! {
    /// Entity or component node.
    NodeId => "node";
    /// Geometry data source; many renderers may reference the same geometry.
    GeometryId => "geometry";
    /// Texture image source.
    TextureId => "texture";
}
