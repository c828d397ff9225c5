//! Graphics state and the save/restore stack.
//!
//! The interpreter keeps one [`StateManager`] per executed content stream.
//! `q` pushes a copy of the current [`GraphicsState`], `Q` pops it back.
//! A restore with nothing saved in the same stream is ignored, so an
//! unbalanced stream can never reach into its caller's state.

use super::font::FontDescriptor;
use super::image::ImageColorSpace;
use super::operator_list::ResourceId;
use std::sync::Arc;

/// Affine transform `[a b c d e f]`:
///
/// ```text
/// | a b 0 |
/// | c d 0 |
/// | e f 1 |
/// ```
pub type Matrix = [f64; 6];

pub const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// `m × n`: apply `m` first, then `n`.
pub fn multiply(m: &Matrix, n: &Matrix) -> Matrix {
    [
        m[0] * n[0] + m[1] * n[2],
        m[0] * n[1] + m[1] * n[3],
        m[2] * n[0] + m[3] * n[2],
        m[2] * n[1] + m[3] * n[3],
        m[4] * n[0] + m[5] * n[2] + n[4],
        m[4] * n[1] + m[5] * n[3] + n[5],
    ]
}

pub fn apply(m: &Matrix, x: f64, y: f64) -> (f64, f64) {
    (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5])
}

/// Axis-aligned bounds `[min_x, min_y, max_x, max_y]` of a transformed rectangle.
pub fn transform_rect(m: &Matrix, rect: &[f64; 4]) -> [f64; 4] {
    let corners = [
        apply(m, rect[0], rect[1]),
        apply(m, rect[2], rect[1]),
        apply(m, rect[0], rect[3]),
        apply(m, rect[2], rect[3]),
    ];
    let mut out = [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY];
    for (x, y) in corners {
        out[0] = out[0].min(x);
        out[1] = out[1].min(y);
        out[2] = out[2].max(x);
        out[3] = out[3].max(y);
    }
    out
}

/// Intersection of two bounds; empty intersections collapse to a zero-area box.
pub fn intersect(a: &[f64; 4], b: &[f64; 4]) -> [f64; 4] {
    let min_x = a[0].max(b[0]);
    let min_y = a[1].max(b[1]);
    [min_x, min_y, a[2].min(b[2]).max(min_x), a[3].min(b[3]).max(min_y)]
}

/// Line cap style (PDF spec 8.4.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCap {
    #[default]
    Butt = 0,
    Round = 1,
    ProjectingSquare = 2,
}

impl LineCap {
    pub fn from_int(value: i64) -> Self {
        match value {
            1 => LineCap::Round,
            2 => LineCap::ProjectingSquare,
            _ => LineCap::Butt,
        }
    }
}

/// Line join style (PDF spec 8.4.3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineJoin {
    #[default]
    Miter = 0,
    Round = 1,
    Bevel = 2,
}

impl LineJoin {
    pub fn from_int(value: i64) -> Self {
        match value {
            1 => LineJoin::Round,
            2 => LineJoin::Bevel,
            _ => LineJoin::Miter,
        }
    }
}

/// Stroke properties for path rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeProps {
    /// Line width in user space units (default: 1.0)
    pub line_width: f64,

    pub line_cap: LineCap,

    pub line_join: LineJoin,

    /// Maximum ratio of miter length to line width before a bevel is used
    pub miter_limit: f64,

    /// Dash lengths alternating on/off
    pub dash_array: Vec<f64>,

    pub dash_offset: f64,
}

impl Default for StrokeProps {
    fn default() -> Self {
        StrokeProps {
            line_width: 1.0,
            line_cap: LineCap::default(),
            line_join: LineJoin::default(),
            miter_limit: 10.0,
            dash_array: Vec::new(),
            dash_offset: 0.0,
        }
    }
}

/// A paint color.
///
/// Device colors are kept in their own space; the interpreter emits them
/// as RGB through [`Color::to_rgb`]. Pattern colors carry the pattern's
/// resource name.
#[derive(Debug, Clone, PartialEq)]
pub enum Color {
    /// Grayscale color (0.0 = black, 1.0 = white)
    Gray(f64),
    RGB(f64, f64, f64),
    CMYK(f64, f64, f64, f64),
    /// Resolved through a color space with an 8-bit RGB result
    Converted([u8; 3]),
    Pattern(String),
}

impl Color {
    /// The initial color for both fill and stroke.
    pub fn black() -> Self {
        Color::Gray(0.0)
    }

    /// 8-bit RGB for solid colors, `None` for patterns.
    pub fn to_rgb(&self) -> Option<[u8; 3]> {
        match self {
            Color::Gray(g) => Some(ImageColorSpace::Gray.color_to_rgb(&[*g])),
            Color::RGB(r, g, b) => Some(ImageColorSpace::RGB.color_to_rgb(&[*r, *g, *b])),
            Color::CMYK(c, m, y, k) => {
                Some(ImageColorSpace::CMYK.color_to_rgb(&[*c, *m, *y, *k]))
            }
            Color::Converted(rgb) => Some(*rgb),
            Color::Pattern(_) => None,
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::black()
    }
}

/// Color space selected by `cs`/`CS`.
#[derive(Debug, Clone, PartialEq)]
pub enum PaintSpace {
    Solid(ImageColorSpace),
    Pattern,
}

impl PaintSpace {
    /// Number of numeric operands `sc`/`scn` expect in this space.
    pub fn components(&self) -> usize {
        match self {
            PaintSpace::Solid(space) => space.components() as usize,
            PaintSpace::Pattern => 0,
        }
    }

    /// The initial color after selecting this space.
    pub fn initial_color(&self) -> Color {
        match self {
            PaintSpace::Solid(ImageColorSpace::CMYK) => Color::CMYK(0.0, 0.0, 0.0, 1.0),
            PaintSpace::Solid(_) => Color::black(),
            PaintSpace::Pattern => Color::Pattern(String::new()),
        }
    }
}

impl Default for PaintSpace {
    fn default() -> Self {
        PaintSpace::Solid(ImageColorSpace::Gray)
    }
}

/// Text rendering mode (PDF spec 9.3.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextRenderingMode {
    #[default]
    Fill = 0,
    Stroke = 1,
    FillStroke = 2,
    Invisible = 3,
    FillClip = 4,
    StrokeClip = 5,
    FillStrokeClip = 6,
    Clip = 7,
}

impl TextRenderingMode {
    pub fn from_int(value: i64) -> Self {
        match value {
            1 => TextRenderingMode::Stroke,
            2 => TextRenderingMode::FillStroke,
            3 => TextRenderingMode::Invisible,
            4 => TextRenderingMode::FillClip,
            5 => TextRenderingMode::StrokeClip,
            6 => TextRenderingMode::FillStrokeClip,
            7 => TextRenderingMode::Clip,
            _ => TextRenderingMode::Fill,
        }
    }
}

/// Fill rule for path filling and clipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillRule {
    #[default]
    NonZero,
    EvenOdd,
}

/// The active font: its resource id in the operator list plus the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveFont {
    pub id: ResourceId,
    pub descriptor: Arc<FontDescriptor>,
}

/// Graphics state as defined in PDF spec section 8.4.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsState {
    /// Current transformation matrix
    pub ctm: Matrix,

    pub fill_space: PaintSpace,
    pub stroke_space: PaintSpace,
    pub fill_color: Color,
    pub stroke_color: Color,
    pub fill_alpha: f64,
    pub stroke_alpha: f64,

    pub stroke_props: StrokeProps,

    /// Clip bounds in device space; `None` means unclipped
    pub clip: Option<[f64; 4]>,

    pub font: Option<ActiveFont>,
    pub font_size: f64,
    /// Tc, in unscaled text space units
    pub char_spacing: f64,
    /// Tw, in unscaled text space units
    pub word_spacing: f64,
    /// Tz as a percentage (default 100)
    pub horizontal_scaling: f64,
    /// TL
    pub leading: f64,
    /// Ts
    pub rise: f64,
    pub render_mode: TextRenderingMode,

    /// Tm
    pub text_matrix: Matrix,
    /// Tlm
    pub text_line_matrix: Matrix,
}

impl Default for GraphicsState {
    fn default() -> Self {
        GraphicsState {
            ctm: IDENTITY,
            fill_space: PaintSpace::default(),
            stroke_space: PaintSpace::default(),
            fill_color: Color::black(),
            stroke_color: Color::black(),
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            stroke_props: StrokeProps::default(),
            clip: None,
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scaling: 100.0,
            leading: 0.0,
            rise: 0.0,
            render_mode: TextRenderingMode::default(),
            text_matrix: IDENTITY,
            text_line_matrix: IDENTITY,
        }
    }
}

impl GraphicsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial state for a page whose user space maps through `ctm`.
    pub fn with_ctm(ctm: Matrix) -> Self {
        GraphicsState {
            ctm,
            ..Self::default()
        }
    }

    /// Concatenates `transform` onto the CTM (`CTM = transform × CTM`).
    pub fn concat_matrix(&mut self, transform: &Matrix) {
        self.ctm = multiply(transform, &self.ctm);
    }

    /// Maps a user space point to device space.
    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        apply(&self.ctm, x, y)
    }

    /// Sets both Tm and Tlm (the `Tm` operator).
    pub fn set_text_matrix(&mut self, matrix: &Matrix) {
        self.text_matrix = *matrix;
        self.text_line_matrix = *matrix;
    }

    /// Starts a new line offset from the start of the current one (`Td`).
    pub fn move_text(&mut self, tx: f64, ty: f64) {
        self.text_line_matrix = multiply(&[1.0, 0.0, 0.0, 1.0, tx, ty], &self.text_line_matrix);
        self.text_matrix = self.text_line_matrix;
    }

    /// `T*`: moves down by the leading.
    pub fn next_line(&mut self) {
        self.move_text(0.0, -self.leading);
    }

    /// Advances Tm horizontally by `tx` unscaled text space units.
    pub fn advance_text(&mut self, tx: f64) {
        self.text_matrix = multiply(&[1.0, 0.0, 0.0, 1.0, tx, 0.0], &self.text_matrix);
    }

    /// Origin of the next glyph in user space (before the CTM).
    pub fn text_position(&self) -> (f64, f64) {
        apply(&self.text_matrix, 0.0, self.rise)
    }

    /// Narrows the clip to `bounds` (device space).
    pub fn intersect_clip(&mut self, bounds: [f64; 4]) {
        self.clip = Some(match &self.clip {
            Some(current) => intersect(current, &bounds),
            None => bounds,
        });
    }
}

/// The `q`/`Q` stack for one content stream execution.
///
/// The stack starts empty at stream entry; the state a stream was entered
/// with can be modified but never popped.
#[derive(Debug, Clone)]
pub struct StateManager {
    current: GraphicsState,
    stack: Vec<GraphicsState>,
}

impl StateManager {
    pub fn new(initial: GraphicsState) -> Self {
        StateManager {
            current: initial,
            stack: Vec::new(),
        }
    }

    pub fn state(&self) -> &GraphicsState {
        &self.current
    }

    pub fn state_mut(&mut self) -> &mut GraphicsState {
        &mut self.current
    }

    pub fn save(&mut self) {
        self.stack.push(self.current.clone());
    }

    /// Pops the most recent save. Returns false (and does nothing) when
    /// there is none.
    pub fn restore(&mut self) -> bool {
        match self.stack.pop() {
            Some(saved) => {
                self.current = saved;
                true
            }
            None => false,
        }
    }

    /// Number of unmatched saves.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn into_state(self) -> GraphicsState {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = GraphicsState::default();
        assert_eq!(state.ctm, IDENTITY);
        assert_eq!(state.fill_color, Color::black());
        assert_eq!(state.stroke_props.line_width, 1.0);
        assert_eq!(state.horizontal_scaling, 100.0);
    }

    #[test]
    fn test_concat_matrix() {
        let mut state = GraphicsState::default();
        state.concat_matrix(&[1.0, 0.0, 0.0, 1.0, 10.0, 20.0]);
        assert_eq!(state.ctm, [1.0, 0.0, 0.0, 1.0, 10.0, 20.0]);

        // A later cm applies in the coordinate system set up by the earlier one
        state.concat_matrix(&[2.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
        assert_eq!(state.ctm, [2.0, 0.0, 0.0, 2.0, 10.0, 20.0]);
        assert_eq!(state.transform_point(1.0, 1.0), (12.0, 22.0));
    }

    #[test]
    fn test_text_line_movement() {
        let mut state = GraphicsState::default();
        state.set_text_matrix(&[1.0, 0.0, 0.0, 1.0, 100.0, 200.0]);
        state.advance_text(30.0);
        assert_eq!(state.text_position(), (130.0, 200.0));

        state.leading = 12.0;
        state.next_line();
        assert_eq!(state.text_position(), (100.0, 188.0));
        assert_eq!(state.text_line_matrix, state.text_matrix);
    }

    #[test]
    fn test_transform_rect_and_intersect() {
        let bounds = transform_rect(&[0.0, 1.0, -1.0, 0.0, 0.0, 0.0], &[0.0, 0.0, 10.0, 5.0]);
        assert_eq!(bounds, [-5.0, 0.0, 0.0, 10.0]);

        let mut state = GraphicsState::default();
        state.intersect_clip([0.0, 0.0, 10.0, 10.0]);
        state.intersect_clip([5.0, 5.0, 20.0, 20.0]);
        assert_eq!(state.clip, Some([5.0, 5.0, 10.0, 10.0]));
        state.intersect_clip([50.0, 50.0, 60.0, 60.0]);
        assert_eq!(state.clip, Some([50.0, 50.0, 50.0, 50.0]));
    }

    #[test]
    fn test_excess_restore_keeps_entry_state() {
        let mut entry = GraphicsState::default();
        entry.stroke_props.line_width = 3.0;
        let mut manager = StateManager::new(entry.clone());

        manager.save();
        manager.state_mut().stroke_props.line_width = 9.0;
        assert!(manager.restore());
        assert!(!manager.restore());
        assert!(!manager.restore());

        assert_eq!(manager.depth(), 0);
        assert_eq!(manager.into_state(), entry);
    }

    #[test]
    fn test_color_to_rgb() {
        assert_eq!(Color::black().to_rgb(), Some([0, 0, 0]));
        assert_eq!(Color::RGB(1.0, 0.0, 0.0).to_rgb(), Some([255, 0, 0]));
        assert_eq!(Color::CMYK(0.0, 0.0, 0.0, 0.0).to_rgb(), Some([255, 255, 255]));
        assert_eq!(Color::Pattern("P0".into()).to_rgb(), None);
    }

    #[test]
    fn test_stroke_props_default() {
        let props = StrokeProps::default();
        assert_eq!(props.line_cap, LineCap::Butt);
        assert_eq!(props.line_join, LineJoin::Miter);
        assert_eq!(props.miter_limit, 10.0);
        assert!(props.dash_array.is_empty());
    }
}
