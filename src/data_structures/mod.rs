//! Engine data structures: instances, vertices and the scene graph.
//!
//! - `instance` holds per-instance transformation data and its GPU layout
//! - `vertex` holds the vertex layout of generated surfaces
//! - `scene_graph` owns every attached node and the resources they reference

pub mod instance;
pub mod scene_graph;
pub mod vertex;
