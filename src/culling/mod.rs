//! Color-coded visibility culling
//!
//! Every tracked geometry gets a unique flat color and a bounding-box proxy.
//! A worker thread renders the proxies from the camera into a small
//! off-screen target, and the colors found in the frame are what is visible.

pub mod color;
pub mod coordinator;
pub mod demand;
pub mod gpu;
pub mod protocol;
pub mod proxy;
pub mod raster;
pub mod renderer;

pub use color::{ColorCode, ColorCodec};
pub use coordinator::{CameraFeed, CullerCoordinator, CullerStats, TrackedInstance, VisibilitySnapshot};
pub use demand::{CullerDemand, GeometryDemand, GeometrySet};
pub use protocol::{ProxyFrame, RenderSurface, RendererCommand, VisibilityReply};
pub use proxy::{ProxyGeometry, ProxyInstance, ProxyMaterial, ProxyMaterials, ProxyMesh, ProxyScene};
pub use raster::{ProxyRasterizer, SoftwareRasterizer};
pub use renderer::{RendererState, VisibilityRendererHandle};
