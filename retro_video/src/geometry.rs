use serde::{Deserialize, Serialize};

/// Six vertices (two triangles) of two floats each.
pub type Quad = [f32; 12];

/// Corner order shared by every quad: top-left, top-right, bottom-right,
/// bottom-left. Triangles are (0, 1, 2) and (0, 2, 3).
const TRIANGLE_CORNERS: [usize; 6] = [0, 1, 2, 0, 2, 3];

/// Texture-space corners matching `TRIANGLE_CORNERS`, v = 0 on the top row.
const UNIT_CORNERS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    /// The whole screen, in normalized units.
    pub const FULL: Rect = Rect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub const ZERO: Rect = Rect {
        x: 0.0,
        y: 0.0,
        width: 0.0,
        height: 0.0,
    };

    fn corners(&self) -> [[f32; 2]; 4] {
        let right = self.x + self.width;
        let bottom = self.y + self.height;
        [
            [self.x, self.y],
            [right, self.y],
            [right, bottom],
            [self.x, bottom],
        ]
    }
}

impl Default for Rect {
    fn default() -> Self {
        Self::FULL
    }
}

/// Texture coordinates of an unrotated, unflipped full quad.
pub fn unit_quad_coordinates() -> Quad {
    triangulate(UNIT_CORNERS)
}

/// Placement of the emulated picture inside the screen.
///
/// Every setter recomputes the derived quads, so the getters are always in
/// sync with the last input. Positions are in normalized device coordinates;
/// the viewport rectangle is normalized to the screen.
#[derive(Debug, Clone)]
pub struct VideoLayout {
    screen_width: u32,
    screen_height: u32,
    viewport: Rect,
    content_width: u32,
    content_height: u32,
    quarter_turns: u8,
    aspect_ratio: Option<f32>,
    integer_scaling: bool,
    bottom_left_origin: bool,
    texture_extent: (f32, f32),
    foreground_bounds: Rect,
    foreground_vertices: Quad,
    background_vertices: Quad,
    framebuffer_vertices: Quad,
    texture_coordinates: Quad,
    backdrop_coordinates: Quad,
}

impl VideoLayout {
    pub fn new(bottom_left_origin: bool, rotation_degrees: f32, viewport: Rect) -> Self {
        let mut layout = Self {
            screen_width: 0,
            screen_height: 0,
            viewport,
            content_width: 0,
            content_height: 0,
            quarter_turns: quantize_rotation(rotation_degrees),
            aspect_ratio: None,
            integer_scaling: false,
            bottom_left_origin,
            texture_extent: (1.0, 1.0),
            foreground_bounds: Rect::ZERO,
            foreground_vertices: [0.0; 12],
            background_vertices: [0.0; 12],
            framebuffer_vertices: [0.0; 12],
            texture_coordinates: [0.0; 12],
            backdrop_coordinates: [0.0; 12],
        };
        layout.recompute();
        layout
    }

    pub fn update_screen_size(&mut self, width: u32, height: u32) {
        self.screen_width = width;
        self.screen_height = height;
        self.recompute();
    }

    pub fn update_viewport_size(&mut self, viewport: Rect) {
        self.viewport = viewport;
        self.recompute();
    }

    pub fn update_content_size(&mut self, width: u32, height: u32) {
        if (width, height) == (self.content_width, self.content_height) {
            return;
        }
        self.content_width = width;
        self.content_height = height;
        self.recompute();
    }

    /// Rotation is snapped to the nearest quarter turn (counter-clockwise).
    pub fn update_rotation(&mut self, degrees: f32) {
        self.quarter_turns = quantize_rotation(degrees);
        self.recompute();
    }

    /// Non-positive or non-finite ratios fall back to the content's own ratio.
    pub fn update_aspect_ratio(&mut self, aspect_ratio: f32) {
        self.aspect_ratio =
            (aspect_ratio.is_finite() && aspect_ratio > 0.0).then_some(aspect_ratio);
        self.recompute();
    }

    pub fn set_integer_scaling(&mut self, enabled: bool) {
        self.integer_scaling = enabled;
        self.recompute();
    }

    /// Portion of the content texture that holds valid pixels.
    pub fn update_texture_extent(&mut self, u: f32, v: f32) {
        let extent = (u.clamp(0.0, 1.0), v.clamp(0.0, 1.0));
        if extent == self.texture_extent {
            return;
        }
        self.texture_extent = extent;
        self.recompute();
    }

    pub fn screen_width(&self) -> u32 {
        self.screen_width
    }

    pub fn screen_height(&self) -> u32 {
        self.screen_height
    }

    pub fn rotation_degrees(&self) -> f32 {
        self.quarter_turns as f32 * 90.0
    }

    pub fn integer_scaling(&self) -> bool {
        self.integer_scaling
    }

    /// Content rectangle in screen pixels, y growing downwards.
    pub fn foreground_bounds(&self) -> Rect {
        self.foreground_bounds
    }

    pub fn relative_foreground_bounds(&self) -> Rect {
        if self.screen_width == 0 || self.screen_height == 0 {
            return Rect::ZERO;
        }
        let sw = self.screen_width as f32;
        let sh = self.screen_height as f32;
        Rect {
            x: self.foreground_bounds.x / sw,
            y: self.foreground_bounds.y / sh,
            width: self.foreground_bounds.width / sw,
            height: self.foreground_bounds.height / sh,
        }
    }

    pub fn foreground_vertices(&self) -> &Quad {
        &self.foreground_vertices
    }

    pub fn background_vertices(&self) -> &Quad {
        &self.background_vertices
    }

    pub fn framebuffer_vertices(&self) -> &Quad {
        &self.framebuffer_vertices
    }

    pub fn texture_coordinates(&self) -> &Quad {
        &self.texture_coordinates
    }

    /// Coordinates that stretch an upright copy of the content across the
    /// background quad so it lines up with the foreground picture.
    pub fn backdrop_coordinates(&self) -> &Quad {
        &self.backdrop_coordinates
    }

    fn recompute(&mut self) {
        self.texture_coordinates = self.compute_texture_coordinates();
        self.framebuffer_vertices = framebuffer_quad(&self.texture_coordinates);

        if self.screen_width == 0 || self.screen_height == 0 {
            self.foreground_bounds = Rect::ZERO;
            self.foreground_vertices = [0.0; 12];
            self.background_vertices = [0.0; 12];
            self.backdrop_coordinates = unit_quad_coordinates();
            return;
        }

        let viewport = self.viewport_pixels();
        self.foreground_bounds = self.fit_content(viewport);
        self.background_vertices = triangulate(viewport.corners().map(|c| self.to_ndc(c)));

        let screen_corners = self.foreground_bounds.corners().map(|c| self.to_ndc(c));
        let turns = self.quarter_turns as usize;
        let mut rotated = [[0.0; 2]; 4];
        for (texture_corner, slot) in rotated.iter_mut().enumerate() {
            *slot = screen_corners[(texture_corner + 4 - turns) % 4];
        }
        self.foreground_vertices = triangulate(rotated);
        self.backdrop_coordinates = self.compute_backdrop_coordinates(viewport);
    }

    fn viewport_pixels(&self) -> Rect {
        let sw = self.screen_width as f32;
        let sh = self.screen_height as f32;
        Rect {
            x: self.viewport.x * sw,
            y: self.viewport.y * sh,
            width: (self.viewport.width * sw).max(0.0),
            height: (self.viewport.height * sh).max(0.0),
        }
    }

    fn fit_content(&self, viewport: Rect) -> Rect {
        let rotated = self.quarter_turns % 2 == 1;
        let (content_w, content_h) = if rotated {
            (self.content_height as f32, self.content_width as f32)
        } else {
            (self.content_width as f32, self.content_height as f32)
        };
        let center_x = viewport.x + viewport.width / 2.0;
        let center_y = viewport.y + viewport.height / 2.0;
        if content_w <= 0.0
            || content_h <= 0.0
            || viewport.width <= 0.0
            || viewport.height <= 0.0
        {
            return Rect {
                x: center_x,
                y: center_y,
                width: 0.0,
                height: 0.0,
            };
        }

        let aspect = match self.aspect_ratio {
            Some(ratio) if rotated => 1.0 / ratio,
            Some(ratio) => ratio,
            None => content_w / content_h,
        };

        let (width, height) = if self.integer_scaling {
            let base_w = if self.aspect_ratio.is_some() {
                content_h * aspect
            } else {
                content_w
            };
            let base_h = content_h;
            let factor = (viewport.width / base_w)
                .floor()
                .min((viewport.height / base_h).floor())
                .max(1.0);
            (base_w * factor, base_h * factor)
        } else if viewport.width / viewport.height > aspect {
            (viewport.height * aspect, viewport.height)
        } else {
            (viewport.width, viewport.width / aspect)
        };

        Rect {
            x: center_x - width / 2.0,
            y: center_y - height / 2.0,
            width,
            height,
        }
    }

    fn compute_texture_coordinates(&self) -> Quad {
        let (extent_u, extent_v) = self.texture_extent;
        triangulate(UNIT_CORNERS.map(|[u, v]| {
            let v = if self.bottom_left_origin { 1.0 - v } else { v };
            [u * extent_u, v * extent_v]
        }))
    }

    fn compute_backdrop_coordinates(&self, viewport: Rect) -> Quad {
        let fg = self.foreground_bounds;
        if fg.width <= 0.0 || fg.height <= 0.0 {
            return unit_quad_coordinates();
        }
        triangulate(viewport.corners().map(|[x, y]| {
            let mut a = (x - fg.x) / fg.width;
            let mut b = (y - fg.y) / fg.height;
            for _ in 0..self.quarter_turns {
                (a, b) = (1.0 - b, a);
            }
            [a, b]
        }))
    }

    fn to_ndc(&self, [x, y]: [f32; 2]) -> [f32; 2] {
        let sw = self.screen_width as f32;
        let sh = self.screen_height as f32;
        [(x / sw) * 2.0 - 1.0, 1.0 - (y / sh) * 2.0]
    }
}

fn quantize_rotation(degrees: f32) -> u8 {
    if !degrees.is_finite() {
        return 0;
    }
    ((degrees / 90.0).round() as i64).rem_euclid(4) as u8
}

/// Intermediate passes write each texel where the content texture holds it,
/// so one set of texture coordinates addresses every pass output.
fn framebuffer_quad(texture_coordinates: &Quad) -> Quad {
    let mut quad = [0.0; 12];
    let pairs = texture_coordinates.chunks_exact(2);
    for (dst, src) in quad.chunks_exact_mut(2).zip(pairs) {
        dst[0] = src[0] * 2.0 - 1.0;
        dst[1] = 1.0 - src[1] * 2.0;
    }
    quad
}

fn triangulate(corners: [[f32; 2]; 4]) -> Quad {
    let mut quad = [0.0; 12];
    for (slot, &corner) in quad.chunks_exact_mut(2).zip(TRIANGLE_CORNERS.iter()) {
        slot.copy_from_slice(&corners[corner]);
    }
    quad
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corner(quad: &Quad, index: usize) -> [f32; 2] {
        // Corners 0..2 are vertices 0..2; corner 3 is vertex 5.
        let vertex = [0, 1, 2, 5][index];
        [quad[vertex * 2], quad[vertex * 2 + 1]]
    }

    fn snes_layout() -> VideoLayout {
        let mut layout = VideoLayout::new(false, 0.0, Rect::FULL);
        layout.update_screen_size(1920, 1080);
        layout.update_content_size(256, 224);
        layout
    }

    #[test]
    fn integer_scaling_centers_largest_fitting_multiple() {
        let mut layout = snes_layout();
        layout.set_integer_scaling(true);

        let bounds = layout.foreground_bounds();
        assert_eq!(bounds.width, 1024.0);
        assert_eq!(bounds.height, 896.0);
        assert_eq!(bounds.x, 448.0);
        assert_eq!(bounds.y, 92.0);
        assert_eq!(1920.0 - bounds.x - bounds.width, 448.0);
        assert_eq!(1080.0 - bounds.y - bounds.height, 92.0);

        let relative = layout.relative_foreground_bounds();
        assert!((relative.x - 448.0 / 1920.0).abs() < 1e-6);
        assert!((relative.height - 896.0 / 1080.0).abs() < 1e-6);

        let top_left = corner(layout.foreground_vertices(), 0);
        assert!((top_left[0] - (448.0 / 1920.0 * 2.0 - 1.0)).abs() < 1e-6);
        assert!((top_left[1] - (1.0 - 92.0 / 1080.0 * 2.0)).abs() < 1e-6);
    }

    #[test]
    fn aspect_fit_fills_the_limiting_dimension() {
        let layout = snes_layout();
        let bounds = layout.foreground_bounds();
        assert_eq!(bounds.height, 1080.0);
        assert!((bounds.width - 1080.0 * 256.0 / 224.0).abs() < 1e-3);
        assert!((bounds.x + bounds.width / 2.0 - 960.0).abs() < 1e-3);
    }

    #[test]
    fn aspect_override_replaces_content_ratio() {
        let mut layout = snes_layout();
        layout.update_aspect_ratio(4.0 / 3.0);
        let bounds = layout.foreground_bounds();
        assert!((bounds.width - 1440.0).abs() < 1e-3);
        assert_eq!(bounds.height, 1080.0);

        layout.update_aspect_ratio(-1.0);
        assert!((layout.foreground_bounds().width - 1080.0 * 256.0 / 224.0).abs() < 1e-3);
    }

    #[test]
    fn quarter_rotation_swaps_fitted_dimensions() {
        let mut layout = VideoLayout::new(false, 0.0, Rect::FULL);
        layout.update_screen_size(1000, 1000);
        layout.update_content_size(200, 100);
        assert_eq!(layout.foreground_bounds().width, 1000.0);
        assert_eq!(layout.foreground_bounds().height, 500.0);

        layout.update_rotation(89.0);
        assert_eq!(layout.rotation_degrees(), 90.0);
        assert_eq!(layout.foreground_bounds().width, 500.0);
        assert_eq!(layout.foreground_bounds().height, 1000.0);

        // Texture top-left lands on the screen's bottom-left corner.
        let first = corner(layout.foreground_vertices(), 0);
        assert_eq!(first, [-0.5, -1.0]);
    }

    #[test]
    fn degenerate_inputs_produce_zero_area_quads() {
        let mut layout = VideoLayout::new(false, 0.0, Rect::FULL);
        assert_eq!(layout.foreground_vertices(), &[0.0; 12]);
        layout.update_screen_size(640, 480);
        let bounds = layout.foreground_bounds();
        assert_eq!(bounds.width, 0.0);
        assert_eq!(bounds.height, 0.0);
        let vertices = layout.foreground_vertices();
        assert!(vertices.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn texture_coordinates_ignore_screen_geometry() {
        let mut layout = snes_layout();
        let before = *layout.texture_coordinates();
        layout.update_screen_size(333, 777);
        layout.update_viewport_size(Rect {
            x: 0.1,
            y: 0.2,
            width: 0.5,
            height: 0.5,
        });
        layout.update_rotation(270.0);
        assert_eq!(layout.texture_coordinates(), &before);
        assert_eq!(before, unit_quad_coordinates());
    }

    #[test]
    fn bottom_left_origin_flips_v_and_extent_scales() {
        let mut layout = VideoLayout::new(true, 0.0, Rect::FULL);
        layout.update_texture_extent(0.5, 0.25);
        let coords = layout.texture_coordinates();
        assert_eq!(corner(coords, 0), [0.0, 0.25]);
        assert_eq!(corner(coords, 2), [0.5, 0.0]);
        let fb = layout.framebuffer_vertices();
        assert_eq!(corner(fb, 0), [-1.0, 0.5]);
        assert_eq!(corner(fb, 2), [0.0, 1.0]);
    }

    #[test]
    fn backdrop_matches_texture_when_content_fills_viewport() {
        let mut layout = VideoLayout::new(false, 0.0, Rect::FULL);
        layout.update_screen_size(200, 100);
        layout.update_content_size(20, 10);
        assert_eq!(layout.backdrop_coordinates(), &unit_quad_coordinates());

        layout.update_screen_size(400, 100);
        let coords = layout.backdrop_coordinates();
        assert_eq!(corner(coords, 0), [-0.5, 0.0]);
        assert_eq!(corner(coords, 2), [1.5, 1.0]);
    }

    #[test]
    fn same_setter_sequence_is_bit_identical() {
        let build = || {
            let mut layout = VideoLayout::new(false, 0.0, Rect::FULL);
            layout.update_screen_size(1280, 720);
            layout.update_viewport_size(Rect {
                x: 0.05,
                y: 0.0,
                width: 0.9,
                height: 0.8,
            });
            layout.update_content_size(320, 240);
            layout.update_rotation(180.0);
            layout.update_aspect_ratio(1.6);
            layout.set_integer_scaling(true);
            layout
        };
        let a = build();
        let b = build();
        let bits = |q: &Quad| q.map(f32::to_bits);
        assert_eq!(bits(a.foreground_vertices()), bits(b.foreground_vertices()));
        assert_eq!(bits(a.background_vertices()), bits(b.background_vertices()));
        assert_eq!(
            bits(a.framebuffer_vertices()),
            bits(b.framebuffer_vertices())
        );
        assert_eq!(bits(a.texture_coordinates()), bits(b.texture_coordinates()));
    }
}
