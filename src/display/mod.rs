pub mod canvas;
pub mod render;

pub use canvas::{Canvas, ImageCanvas};
pub use render::{to_image, RenderLoop, RenderOutcome, RenderStats};
