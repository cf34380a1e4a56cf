pub mod offscreen;
pub mod render;

pub use offscreen::OffscreenRenderer;
pub use render::{SkiaRenderer, render_text_pixmap};
