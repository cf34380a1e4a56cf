use std::collections::HashMap;
use std::f32::consts::FRAC_PI_3;

use ab_glyph::{Font, FontVec, Glyph, PxScale, ScaleFont, point};
use pursuit_core::{
    DirectionCue, Point, RenderError, Rgba, Scene, StimulusSettings, TargetDrawing, TextSettings,
};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Stroke, Transform};

/// Rasterized instruction strings, keyed by content. Instruction text only
/// changes between phases, so each string is laid out once.
struct TextCache {
    font: Option<FontVec>,
    size_px: f32,
    color: Rgba,
    map: HashMap<String, Pixmap>,
}

impl TextCache {
    fn new(settings: &TextSettings) -> Self {
        Self {
            font: load_font(settings),
            size_px: settings.size_px,
            color: settings.color,
            map: HashMap::new(),
        }
    }

    fn get_or_render(&mut self, text: &str) -> Option<&Pixmap> {
        let font = self.font.as_ref()?;
        if !self.map.contains_key(text) {
            let pm = render_text_pixmap(text, self.size_px, font, self.color)?;
            self.map.insert(text.to_string(), pm);
        }
        self.map.get(text)
    }
}

fn load_font(settings: &TextSettings) -> Option<FontVec> {
    let path = settings.font_path.as_ref()?;
    match std::fs::read(path) {
        Ok(bytes) => match FontVec::try_from_vec(bytes) {
            Ok(font) => Some(font),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "font unreadable, text disabled");
                None
            }
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "font missing, text disabled");
            None
        }
    }
}

pub fn render_text_pixmap<F: Font>(
    text: &str,
    font_size: f32,
    font: &F,
    color: Rgba,
) -> Option<Pixmap> {
    let scale = PxScale::from(font_size);
    let sf = font.as_scaled(scale);

    // layout with the first baseline at ascent; '\n' starts a new line
    let line_height = sf.height() + sf.line_gap();
    let mut pen_x = 0.0f32;
    let mut baseline = sf.ascent();
    let mut prev = None;
    let mut glyphs = Vec::<Glyph>::new();
    for ch in text.chars() {
        if ch == '\n' {
            pen_x = 0.0;
            baseline += line_height;
            prev = None;
            continue;
        }
        let id = font.glyph_id(ch);
        if let Some(prev) = prev {
            pen_x += sf.kern(prev, id);
        }
        glyphs.push(Glyph {
            id,
            scale,
            position: point(pen_x, baseline),
        });
        pen_x += sf.h_advance(id);
        prev = Some(id);
    }

    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;
    for g in &glyphs {
        if let Some(out) = font.outline_glyph(g.clone()) {
            let b = out.px_bounds();
            min_x = min_x.min(b.min.x);
            min_y = min_y.min(b.min.y);
            max_x = max_x.max(b.max.x);
            max_y = max_y.max(b.max.y);
        }
    }
    if min_x == f32::INFINITY {
        return None;
    }

    let w = (max_x.ceil() - min_x.floor()).max(1.0) as u32;
    let h = (max_y.ceil() - min_y.floor()).max(1.0) as u32;
    let mut pm = Pixmap::new(w, h)?;
    let stride = w as usize * 4;
    let dst = pm.data_mut();

    for g in &glyphs {
        if let Some(out) = font.outline_glyph(g.clone()) {
            let b = out.px_bounds();
            out.draw(|x, y, cov| {
                if cov <= f32::EPSILON {
                    return;
                }
                let ix = (x as f32 + b.min.x - min_x).floor() as i32;
                let iy = (y as f32 + b.min.y - min_y).floor() as i32;
                if ix < 0 || iy < 0 || ix >= w as i32 || iy >= h as i32 {
                    return;
                }
                let i = iy as usize * stride + ix as usize * 4;

                // premultiplied source over whatever an overlapping glyph left
                let a = (cov * f32::from(color[3]) / 255.0).clamp(0.0, 1.0);
                let inv = 1.0 - a;
                for c in 0..3 {
                    let src = f32::from(color[c]) * a;
                    dst[i + c] = (src + f32::from(dst[i + c]) * inv).min(255.0) as u8;
                }
                dst[i + 3] = (a * 255.0 + f32::from(dst[i + 3]) * inv).min(255.0) as u8;
            });
        }
    }

    Some(pm)
}

fn circle_sprite(radius: f32, fill: Rgba, line: Rgba) -> Result<Pixmap, RenderError> {
    let line_width = 1.5;
    let size = (radius * 2.0 + line_width * 2.0).ceil().max(1.0) as u32;
    let mut pm = Pixmap::new(size, size)
        .ok_or_else(|| RenderError::Surface(format!("cannot allocate {size}x{size} sprite")))?;
    let c = size as f32 * 0.5;
    if let Some(path) = PathBuilder::from_circle(c, c, radius.max(0.5)) {
        let mut paint = Paint::default();
        paint.anti_alias = true;
        paint.set_color_rgba8(fill[0], fill[1], fill[2], fill[3]);
        pm.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        paint.set_color_rgba8(line[0], line[1], line[2], line[3]);
        let stroke = Stroke {
            width: line_width,
            ..Stroke::default()
        };
        pm.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    }
    Ok(pm)
}

/// Copies `sprite` centred on `pos`, clipped to the canvas. Opaque rows are
/// memcpy'd, the rest blended in premultiplied space.
fn blit(canvas: &mut Pixmap, sprite: &Pixmap, pos: (f32, f32)) {
    let (w, h) = (sprite.width() as i32, sprite.height() as i32);
    let x0 = (pos.0 - w as f32 * 0.5).floor() as i32;
    let y0 = (pos.1 - h as f32 * 0.5).floor() as i32;

    let dst_x_start = x0.max(0);
    let dst_y_start = y0.max(0);
    let dst_x_end = (x0 + w).min(canvas.width() as i32);
    let dst_y_end = (y0 + h).min(canvas.height() as i32);
    if dst_x_end <= dst_x_start || dst_y_end <= dst_y_start {
        return;
    }
    let src_x_start = (dst_x_start - x0) as usize;
    let src_y_start = (dst_y_start - y0) as usize;
    let max_w = (dst_x_end - dst_x_start) as usize;
    let max_h = (dst_y_end - dst_y_start) as usize;

    let src_stride = sprite.width() as usize * 4;
    let dst_stride = canvas.width() as usize * 4;
    let src_data = sprite.data();
    let dst_data = canvas.data_mut();

    for y in 0..max_h {
        let src_row = (src_y_start + y) * src_stride + src_x_start * 4;
        let dst_row = (dst_y_start as usize + y) * dst_stride + dst_x_start as usize * 4;
        let src = &src_data[src_row..src_row + max_w * 4];
        let dst = &mut dst_data[dst_row..dst_row + max_w * 4];

        if src.chunks_exact(4).all(|px| px[3] == 255) {
            dst.copy_from_slice(src);
            continue;
        }
        for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
            let inv_a = 255 - u32::from(s[3]);
            for c in 0..4 {
                d[c] = (u32::from(s[c]) + (u32::from(d[c]) * inv_a + 127) / 255) as u8;
            }
        }
    }
}

/// Software rasterizer for trial scenes. Coordinates in a `Scene` are
/// centred and y-up; the canvas is top-left origin.
pub struct SkiaRenderer {
    width: u32,
    height: u32,
    center: (f32, f32),
    settings: StimulusSettings,
    canvas: Pixmap,
    target_sprite: Pixmap,
    element_sprite: Pixmap,
    text_cache: TextCache,
}

impl SkiaRenderer {
    pub fn new(width: u32, height: u32, settings: &StimulusSettings) -> Result<Self, RenderError> {
        let canvas = Pixmap::new(width, height)
            .ok_or_else(|| RenderError::Surface(format!("invalid canvas size {width}x{height}")))?;
        let t = &settings.target;
        let target_sprite = circle_sprite(t.radius_px, t.fill_color, t.line_color)?;
        let element_sprite = circle_sprite(t.element_radius_px, t.fill_color, t.line_color)?;
        Ok(Self {
            width,
            height,
            center: (width as f32 / 2.0, height as f32 / 2.0),
            settings: settings.clone(),
            canvas,
            target_sprite,
            element_sprite,
            text_cache: TextCache::new(&settings.text),
        })
    }

    pub fn resize(&mut self, new_width: u32, new_height: u32) -> Result<(), RenderError> {
        self.canvas = Pixmap::new(new_width, new_height).ok_or_else(|| {
            RenderError::Surface(format!("invalid canvas size {new_width}x{new_height}"))
        })?;
        self.width = new_width;
        self.height = new_height;
        self.center = (new_width as f32 / 2.0, new_height as f32 / 2.0);
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn canvas(&self) -> &Pixmap {
        &self.canvas
    }

    fn to_canvas(&self, p: Point) -> (f32, f32) {
        (self.center.0 + p.x, self.center.1 - p.y)
    }

    /// Rasterizes `scene` onto the internal canvas.
    pub fn draw(&mut self, scene: &Scene<'_>) -> &Pixmap {
        let bg = self.settings.background;
        self.canvas.fill(Color::from_rgba8(bg[0], bg[1], bg[2], bg[3]));

        match scene.target {
            Some(TargetDrawing::Circle { center }) => {
                let pos = self.to_canvas(center);
                blit(&mut self.canvas, &self.target_sprite, pos);
            }
            Some(TargetDrawing::Element { center, .. }) => {
                let pos = self.to_canvas(center);
                blit(&mut self.canvas, &self.element_sprite, pos);
            }
            None => {}
        }

        if let Some(cue) = scene.cue {
            self.draw_cue(&cue);
        }

        if let Some(text) = scene.text {
            let pos = self.to_canvas(Point::new(0.0, self.settings.text.y_px));
            if let Some(pm) = self.text_cache.get_or_render(text) {
                blit(&mut self.canvas, pm, pos);
            }
        }

        &self.canvas
    }

    /// Arrow pointing along the trajectory: a straight shaft offset from the
    /// target for linear paths, an arc following the orbit for circles.
    fn draw_cue(&mut self, cue: &DirectionCue) {
        let s = &self.settings.cue;
        let length = s.length_px;
        let tip_length = 0.3 * length;
        let tip_width = 0.1 * length;

        let mut shaft = PathBuilder::new();
        let (tip, dir) = match cue.trajectory.axis_step() {
            Some((dx, dy)) => {
                let norm = (dx * dx + dy * dy).sqrt() as f32;
                let (ux, uy) = (dx as f32 / norm, dy as f32 / norm);
                let start = cue.origin.offset(ux * s.offset_px, uy * s.offset_px);
                let end = start.offset(ux * length, uy * length);
                let (sx, sy) = self.to_canvas(start);
                let (ex, ey) = self.to_canvas(end);
                shaft.move_to(sx, sy);
                shaft.line_to(ex, ey);
                ((ex, ey), (ux, -uy))
            }
            None => {
                let radius = cue.origin.distance(Point::ORIGIN).max(length);
                let start_angle = cue.origin.y.atan2(cue.origin.x);
                // clockwise means decreasing angle with y up
                let sweep = if cue.trajectory == pursuit_core::Trajectory::CirClock {
                    -FRAC_PI_3
                } else {
                    FRAC_PI_3
                };
                let steps = 24;
                let mut last = (0.0, 0.0);
                for i in 0..=steps {
                    let a = start_angle + sweep * i as f32 / steps as f32;
                    let p = self.to_canvas(Point::new(radius * a.cos(), radius * a.sin()));
                    if i == 0 {
                        shaft.move_to(p.0, p.1);
                    } else {
                        shaft.line_to(p.0, p.1);
                    }
                    last = p;
                }
                let end_angle = start_angle + sweep;
                let sign = sweep.signum();
                // tangent of the arc in the direction of travel, in canvas space
                let (tx, ty) = (-end_angle.sin() * sign, end_angle.cos() * sign);
                (last, (tx, -ty))
            }
        };

        let mut paint = Paint::default();
        paint.anti_alias = true;
        paint.set_color_rgba8(s.color[0], s.color[1], s.color[2], s.color[3]);
        let stroke = Stroke {
            width: s.line_width,
            ..Stroke::default()
        };
        if let Some(path) = shaft.finish() {
            self.canvas
                .stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        }

        let (tx, ty) = tip;
        let (dx, dy) = dir;
        let (px, py) = (-dy, dx);
        let mut head = PathBuilder::new();
        head.move_to(tx + dx * tip_length, ty + dy * tip_length);
        head.line_to(tx + px * tip_width, ty + py * tip_width);
        head.line_to(tx - px * tip_width, ty - py * tip_width);
        head.close();
        if let Some(path) = head.finish() {
            self.canvas
                .fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        }
    }

    /// Copies the last drawn frame into an RGBA8 buffer of the same size.
    pub fn copy_to(&self, frame: &mut [u8]) -> Result<(), RenderError> {
        let data = self.canvas.data();
        if frame.len() != data.len() {
            return Err(RenderError::Surface(format!(
                "frame buffer holds {} bytes, canvas {}",
                frame.len(),
                data.len()
            )));
        }
        frame.copy_from_slice(data);
        Ok(())
    }
}
