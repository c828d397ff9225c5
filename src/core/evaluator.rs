//! Content stream interpreter.
//!
//! [`PartialEvaluator`] executes a page's operators against a
//! [`GraphicsState`], resolves the resources they name (fonts, images,
//! forms, color spaces, ExtGState) and appends device-ready operators to an
//! [`OperatorList`]. A fault in one operator is logged and skipped; only
//! cancellation and fatal faults stop a request.

use super::content_stream::{ContentStreamEvaluator, OpCode, Operation};
use super::decode::{self, Decoded, FilterCategory};
use super::document::PDFDocument;
use super::error::{ErrorKind, PDFError, PDFResult};
use super::font::{self, FontDescriptor, Glyph};
use super::graphics_state::{
    self, ActiveFont, Color, GraphicsState, IDENTITY, LineCap, LineJoin, Matrix, PaintSpace,
    StateManager, TextRenderingMode,
};
use super::image::{self, DecodedImage, ImageColorSpace};
use super::operator_list::{
    CancellationToken, ChunkSink, DecodedResource, OpArg, OperatorList, PositionedGlyph,
    ResourceId,
};
use super::options::EvaluatorOptions;
use super::page::Page;
use super::parser::{Dict, PDFObject, PdfStream, Ref};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// State local to one content stream execution.
struct StreamContext<'r> {
    resources: &'r Dict,
    state: StateManager,
    depth: usize,
    /// Device space bounds of the path under construction
    path_bounds: Option<[f64; 4]>,
    /// Set by `W`/`W*`, applied when the path is painted
    pending_clip: bool,
}

impl StreamContext<'_> {
    fn extend_path(&mut self, points: &[(f64, f64)]) {
        let ctm = self.state.state().ctm;
        for &(x, y) in points {
            let (dx, dy) = graphics_state::apply(&ctm, x, y);
            let bounds = self.path_bounds.get_or_insert([dx, dy, dx, dy]);
            bounds[0] = bounds[0].min(dx);
            bounds[1] = bounds[1].min(dy);
            bounds[2] = bounds[2].max(dx);
            bounds[3] = bounds[3].max(dy);
        }
    }

    fn finish_path(&mut self) {
        if self.pending_clip {
            let bounds = self.path_bounds.unwrap_or([0.0; 4]);
            self.state.state_mut().intersect_clip(bounds);
        }
        self.pending_clip = false;
        self.path_bounds = None;
    }
}

/// A piece of a text-showing operand.
enum TextPiece<'a> {
    Text(&'a [u8]),
    /// `TJ` adjustment in thousandths of text space
    Adjust(f64),
}

/// Interprets content streams of one document.
///
/// Font and image resources are decoded once per evaluator and shared by
/// every operator that references them.
pub struct PartialEvaluator<'d> {
    doc: &'d PDFDocument,
    options: EvaluatorOptions,
    cancel: CancellationToken,
    fonts: FxHashMap<Ref, ActiveFont>,
    images: FxHashMap<Ref, (ResourceId, Arc<DecodedImage>)>,
    fallback_font: Option<ActiveFont>,
    /// Forms currently executing, innermost last
    form_chain: Vec<Ref>,
    /// Type 3 fonts whose glyph procedures are executing
    glyph_chain: Vec<ResourceId>,
    next_id: u32,
    faults: usize,
}

impl<'d> PartialEvaluator<'d> {
    pub fn new(doc: &'d PDFDocument, options: EvaluatorOptions) -> Self {
        PartialEvaluator {
            doc,
            options,
            cancel: CancellationToken::new(),
            fonts: FxHashMap::default(),
            images: FxHashMap::default(),
            fallback_font: None,
            form_chain: Vec::new(),
            glyph_chain: Vec::new(),
            next_id: 0,
            faults: 0,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Operator faults absorbed so far.
    pub fn fault_count(&self) -> usize {
        self.faults
    }

    /// Interprets a page and streams its operator list into `sink`.
    ///
    /// Returns the number of operators emitted. The last chunk delivered to
    /// the sink has `last` set unless the request fails or is cancelled.
    pub fn get_operator_list(&mut self, page: &Page, sink: &mut dyn ChunkSink) -> PDFResult<usize> {
        self.check_cancelled()?;
        let content = page.content_bytes(self.doc);
        let mut list = OperatorList::new(sink, self.options.chunk_size)
            .with_cancellation(self.cancel.clone());
        self.evaluate(&content, page.resources(), GraphicsState::default(), &mut list)?;
        let count = list.finish()?;
        tracing::debug!(
            page = page.index(),
            operators = count,
            faults = self.faults,
            "Page evaluated"
        );
        Ok(count)
    }

    /// Executes `content` starting from `initial` and returns the final state.
    pub fn evaluate(
        &mut self,
        content: &[u8],
        resources: &Dict,
        initial: GraphicsState,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<GraphicsState> {
        self.run_stream(content, resources, initial, 0, list)
    }

    fn run_stream(
        &mut self,
        content: &[u8],
        resources: &Dict,
        initial: GraphicsState,
        depth: usize,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<GraphicsState> {
        let mut reader = match ContentStreamEvaluator::from_bytes(content.to_vec()) {
            Ok(reader) => reader,
            Err(e) => {
                self.absorb(e)?;
                return Ok(initial);
            }
        };
        let mut ctx = StreamContext {
            resources,
            state: StateManager::new(initial),
            depth,
            path_bounds: None,
            pending_clip: false,
        };

        loop {
            self.check_cancelled()?;
            let operation = match reader.read_operation() {
                Ok(Some(operation)) => operation,
                Ok(None) => break,
                Err(e) => {
                    self.absorb(e)?;
                    continue;
                }
            };
            if let Err(e) = self.execute(operation, &mut ctx, list) {
                self.absorb(e)?;
            }
        }

        // Close saves the stream left open
        while ctx.state.restore() {
            list.push(OpCode::Restore, vec![])?;
        }
        Ok(ctx.state.into_state())
    }

    fn check_cancelled(&self) -> PDFResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PDFError::Cancelled);
        }
        Ok(())
    }

    /// Logs and drops a recoverable fault.
    fn absorb(&mut self, err: PDFError) -> PDFResult<()> {
        match err.kind() {
            ErrorKind::Cancelled | ErrorKind::Fatal => Err(err),
            _ if self.options.ignore_errors => {
                self.faults += 1;
                tracing::warn!("Skipping operator: {}", err);
                Ok(())
            }
            _ => Err(err),
        }
    }

    fn next_resource_id(&mut self, kind: &str) -> ResourceId {
        self.next_id += 1;
        ResourceId::new(kind, self.next_id)
    }

    /// Looks up `/category /name` in a resource dictionary.
    fn resource(&self, resources: &Dict, category: &str, name: &str) -> Option<PDFObject> {
        self.doc.get_dict(resources, category)?.get(name).cloned()
    }

    fn execute(
        &mut self,
        operation: Operation,
        ctx: &mut StreamContext<'_>,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<()> {
        let Operation { op, args } = operation;
        match op {
            // Graphics state
            OpCode::SetLineWidth => {
                let width = number(&args, 0)?;
                ctx.state.state_mut().stroke_props.line_width = width;
                list.push(op, vec![OpArg::Number(width)])
            }
            OpCode::SetLineCap => {
                let cap = number(&args, 0)?;
                ctx.state.state_mut().stroke_props.line_cap = LineCap::from_int(cap as i64);
                list.push(op, vec![OpArg::Number(cap)])
            }
            OpCode::SetLineJoin => {
                let join = number(&args, 0)?;
                ctx.state.state_mut().stroke_props.line_join = LineJoin::from_int(join as i64);
                list.push(op, vec![OpArg::Number(join)])
            }
            OpCode::SetMiterLimit => {
                let limit = number(&args, 0)?;
                ctx.state.state_mut().stroke_props.miter_limit = limit;
                list.push(op, vec![OpArg::Number(limit)])
            }
            OpCode::SetDash => {
                let (dashes, phase) = dash_pattern(&args[0], &args[1])?;
                self.apply_dash(dashes, phase, ctx, list)
            }
            OpCode::SetRenderingIntent => list.push(op, vec![OpArg::Name(name(&args, 0)?.to_string())]),
            OpCode::SetFlatness => list.push(op, vec![OpArg::Number(number(&args, 0)?)]),
            OpCode::SetGState => self.set_gstate(name(&args, 0)?, ctx, list),
            OpCode::Save => {
                ctx.state.save();
                list.push(op, vec![])
            }
            OpCode::Restore => {
                if ctx.state.restore() {
                    list.push(op, vec![])
                } else {
                    tracing::debug!("Ignoring Q without a matching q");
                    Ok(())
                }
            }
            OpCode::Transform => {
                let m = numbers::<6>(&args)?;
                ctx.state.state_mut().concat_matrix(&m);
                list.push(op, vec![OpArg::numbers(&m)])
            }

            // Path construction
            OpCode::MoveTo | OpCode::LineTo => {
                let [x, y] = numbers::<2>(&args)?;
                ctx.extend_path(&[(x, y)]);
                list.push(op, vec![OpArg::Number(x), OpArg::Number(y)])
            }
            OpCode::CurveTo => {
                let p = numbers::<6>(&args)?;
                ctx.extend_path(&[(p[0], p[1]), (p[2], p[3]), (p[4], p[5])]);
                list.push(op, p.iter().map(|v| OpArg::Number(*v)).collect())
            }
            OpCode::CurveTo2 | OpCode::CurveTo3 => {
                let p = numbers::<4>(&args)?;
                ctx.extend_path(&[(p[0], p[1]), (p[2], p[3])]);
                list.push(op, p.iter().map(|v| OpArg::Number(*v)).collect())
            }
            OpCode::Rectangle => {
                let [x, y, w, h] = numbers::<4>(&args)?;
                ctx.extend_path(&[(x, y), (x + w, y), (x, y + h), (x + w, y + h)]);
                list.push(op, [x, y, w, h].iter().map(|v| OpArg::Number(*v)).collect())
            }
            OpCode::ClosePath => list.push(op, vec![]),

            // Painting
            OpCode::Stroke
            | OpCode::CloseStroke
            | OpCode::Fill
            | OpCode::EOFill
            | OpCode::FillStroke
            | OpCode::EOFillStroke
            | OpCode::CloseFillStroke
            | OpCode::CloseEOFillStroke
            | OpCode::EndPath => {
                list.push(op, vec![])?;
                ctx.finish_path();
                Ok(())
            }
            OpCode::Clip | OpCode::EOClip => {
                ctx.pending_clip = true;
                list.push(op, vec![])
            }

            // Text objects and state
            OpCode::BeginText => {
                ctx.state.state_mut().set_text_matrix(&IDENTITY);
                list.push(op, vec![])
            }
            OpCode::EndText => list.push(op, vec![]),
            OpCode::SetCharSpacing => {
                let value = number(&args, 0)?;
                ctx.state.state_mut().char_spacing = value;
                list.push(op, vec![OpArg::Number(value)])
            }
            OpCode::SetWordSpacing => {
                let value = number(&args, 0)?;
                ctx.state.state_mut().word_spacing = value;
                list.push(op, vec![OpArg::Number(value)])
            }
            OpCode::SetHScale => {
                let value = number(&args, 0)?;
                ctx.state.state_mut().horizontal_scaling = value;
                list.push(op, vec![OpArg::Number(value)])
            }
            OpCode::SetLeading => {
                let value = number(&args, 0)?;
                ctx.state.state_mut().leading = value;
                list.push(op, vec![OpArg::Number(value)])
            }
            OpCode::SetTextRise => {
                let value = number(&args, 0)?;
                ctx.state.state_mut().rise = value;
                list.push(op, vec![OpArg::Number(value)])
            }
            OpCode::SetTextRenderingMode => {
                let mode = number(&args, 0)?;
                ctx.state.state_mut().render_mode = TextRenderingMode::from_int(mode as i64);
                list.push(op, vec![OpArg::Number(mode)])
            }
            OpCode::SetFont => {
                let font_name = name(&args, 0)?;
                let size = number(&args, 1)?;
                let raw = self.resource(ctx.resources, "Font", font_name);
                let font = self.load_font(raw.as_ref(), font_name);
                self.activate_font(font, size, ctx, list)
            }
            OpCode::MoveText => {
                let [tx, ty] = numbers::<2>(&args)?;
                ctx.state.state_mut().move_text(tx, ty);
                list.push(op, vec![OpArg::Number(tx), OpArg::Number(ty)])
            }
            OpCode::SetLeadingMoveText => {
                let [tx, ty] = numbers::<2>(&args)?;
                let state = ctx.state.state_mut();
                state.leading = -ty;
                state.move_text(tx, ty);
                list.push(op, vec![OpArg::Number(tx), OpArg::Number(ty)])
            }
            OpCode::SetTextMatrix => {
                let m = numbers::<6>(&args)?;
                ctx.state.state_mut().set_text_matrix(&m);
                list.push(op, vec![OpArg::numbers(&m)])
            }
            OpCode::NextLine => {
                ctx.state.state_mut().next_line();
                list.push(op, vec![])
            }

            // Text showing
            OpCode::ShowText => {
                let pieces = [TextPiece::Text(string(&args, 0)?)];
                self.show_text(op, &pieces, ctx, list)
            }
            OpCode::ShowSpacedText => {
                let items = args[0]
                    .as_array()
                    .ok_or_else(|| PDFError::operator("TJ operand is not an array"))?;
                let pieces: Vec<TextPiece<'_>> = items
                    .iter()
                    .filter_map(|item| match item {
                        PDFObject::Number(n) => Some(TextPiece::Adjust(*n)),
                        other => other.as_bytes().map(TextPiece::Text),
                    })
                    .collect();
                self.show_text(op, &pieces, ctx, list)
            }
            OpCode::NextLineShowText => {
                let text = string(&args, 0)?;
                ctx.state.state_mut().next_line();
                list.push(OpCode::NextLine, vec![])?;
                self.show_text(OpCode::ShowText, &[TextPiece::Text(text)], ctx, list)
            }
            OpCode::NextLineSetSpacingShowText => {
                let word_spacing = number(&args, 0)?;
                let char_spacing = number(&args, 1)?;
                let text = string(&args, 2)?;
                let state = ctx.state.state_mut();
                state.word_spacing = word_spacing;
                state.char_spacing = char_spacing;
                state.next_line();
                list.push(OpCode::SetWordSpacing, vec![OpArg::Number(word_spacing)])?;
                list.push(OpCode::SetCharSpacing, vec![OpArg::Number(char_spacing)])?;
                list.push(OpCode::NextLine, vec![])?;
                self.show_text(OpCode::ShowText, &[TextPiece::Text(text)], ctx, list)
            }

            // Type 3 glyph metrics
            OpCode::SetCharWidth | OpCode::SetCharWidthAndBounds => {
                let values: Vec<OpArg> = args.iter().map(OpArg::from_object).collect();
                list.push(op, values)
            }

            // Color
            OpCode::SetStrokeColorSpace | OpCode::SetFillColorSpace => {
                let stroke = op == OpCode::SetStrokeColorSpace;
                self.set_color_space(stroke, name(&args, 0)?, ctx, list)
            }
            OpCode::SetStrokeColor | OpCode::SetStrokeColorN => self.set_color(true, &args, ctx, list),
            OpCode::SetFillColor | OpCode::SetFillColorN => self.set_color(false, &args, ctx, list),
            OpCode::SetStrokeGray | OpCode::SetFillGray => {
                let gray = number(&args, 0)?;
                let stroke = op == OpCode::SetStrokeGray;
                self.set_device_color(stroke, ImageColorSpace::Gray, Color::Gray(gray), ctx, list)
            }
            OpCode::SetStrokeRGBColor | OpCode::SetFillRGBColor => {
                let [r, g, b] = numbers::<3>(&args)?;
                let stroke = op == OpCode::SetStrokeRGBColor;
                self.set_device_color(stroke, ImageColorSpace::RGB, Color::RGB(r, g, b), ctx, list)
            }
            OpCode::SetStrokeCMYKColor | OpCode::SetFillCMYKColor => {
                let [c, m, y, k] = numbers::<4>(&args)?;
                let stroke = op == OpCode::SetStrokeCMYKColor;
                self.set_device_color(stroke, ImageColorSpace::CMYK, Color::CMYK(c, m, y, k), ctx, list)
            }

            // Shading, XObjects, inline images
            OpCode::ShadingFill => list.push(op, vec![OpArg::Name(name(&args, 0)?.to_string())]),
            OpCode::PaintXObject => self.paint_xobject(name(&args, 0)?, ctx, list),
            OpCode::BeginInlineImage | OpCode::BeginImageData => Ok(()),
            OpCode::EndInlineImage => {
                let stream = args
                    .first()
                    .and_then(PDFObject::as_stream)
                    .ok_or_else(|| PDFError::operator("EI without image data"))?;
                self.paint_image(None, stream, true, ctx, list)
            }

            // Marked content
            OpCode::MarkPoint | OpCode::BeginMarkedContent => {
                list.push(op, vec![OpArg::Name(name(&args, 0)?.to_string())])
            }
            OpCode::MarkPointProps | OpCode::BeginMarkedContentProps => {
                let tag = name(&args, 0)?.to_string();
                let properties = match &args[1] {
                    PDFObject::Name(n) => self
                        .resource(ctx.resources, "Properties", n)
                        .map(|value| OpArg::from_object(&self.doc.fetch_if_ref(&value)))
                        .unwrap_or_else(|| OpArg::Name(n.clone())),
                    other => OpArg::from_object(other),
                };
                list.push(op, vec![OpArg::Name(tag), properties])
            }
            OpCode::EndMarkedContent => list.push(op, vec![]),

            OpCode::BeginCompat | OpCode::EndCompat => Ok(()),

            OpCode::PaintFormXObjectBegin
            | OpCode::PaintFormXObjectEnd
            | OpCode::PaintImageMaskXObject
            | OpCode::PaintImageXObject
            | OpCode::PaintInlineImageXObject => Err(PDFError::operator(format!(
                "{} cannot appear in a content stream",
                op
            ))),
        }
    }

    fn apply_dash(
        &mut self,
        dashes: Vec<f64>,
        phase: f64,
        ctx: &mut StreamContext<'_>,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<()> {
        let props = &mut ctx.state.state_mut().stroke_props;
        props.dash_array = dashes.clone();
        props.dash_offset = phase;
        list.push(OpCode::SetDash, vec![OpArg::numbers(&dashes), OpArg::Number(phase)])
    }

    /// `gs`: applies an ExtGState dictionary key by key.
    fn set_gstate(
        &mut self,
        gs_name: &str,
        ctx: &mut StreamContext<'_>,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<()> {
        let gs = self
            .resource(ctx.resources, "ExtGState", gs_name)
            .map(|value| self.doc.fetch_if_ref(&value));
        let Some(PDFObject::Dictionary(gs)) = gs else {
            return Err(PDFError::operator(format!("Unknown ExtGState /{}", gs_name)));
        };

        let mut keys: Vec<&String> = gs.keys().collect();
        keys.sort();
        let mut transparency = Vec::new();
        for key in keys {
            let value = self.doc.fetch_if_ref(&gs[key]);
            match key.as_str() {
                "LW" => {
                    if let Some(width) = value.as_number() {
                        ctx.state.state_mut().stroke_props.line_width = width;
                        list.push(OpCode::SetLineWidth, vec![OpArg::Number(width)])?;
                    }
                }
                "LC" => {
                    if let Some(cap) = value.as_number() {
                        ctx.state.state_mut().stroke_props.line_cap = LineCap::from_int(cap as i64);
                        list.push(OpCode::SetLineCap, vec![OpArg::Number(cap)])?;
                    }
                }
                "LJ" => {
                    if let Some(join) = value.as_number() {
                        ctx.state.state_mut().stroke_props.line_join = LineJoin::from_int(join as i64);
                        list.push(OpCode::SetLineJoin, vec![OpArg::Number(join)])?;
                    }
                }
                "ML" => {
                    if let Some(limit) = value.as_number() {
                        ctx.state.state_mut().stroke_props.miter_limit = limit;
                        list.push(OpCode::SetMiterLimit, vec![OpArg::Number(limit)])?;
                    }
                }
                "D" => {
                    if let Some([dashes, phase]) = value.as_array() {
                        let (dashes, phase) = dash_pattern(dashes, phase)?;
                        self.apply_dash(dashes, phase, ctx, list)?;
                    }
                }
                "CA" | "ca" => {
                    if let Some(alpha) = value.as_number() {
                        let alpha = alpha.clamp(0.0, 1.0);
                        let state = ctx.state.state_mut();
                        if key == "CA" {
                            state.stroke_alpha = alpha;
                        } else {
                            state.fill_alpha = alpha;
                        }
                        transparency.push((key.clone(), OpArg::Number(alpha)));
                    }
                }
                "Font" => {
                    if let Some([font_ref, size]) = value.as_array() {
                        let size = size.as_number().unwrap_or(0.0);
                        let font = self.load_font(Some(font_ref), "ExtGState font");
                        self.activate_font(font, size, ctx, list)?;
                    }
                }
                "Type" => {}
                other => tracing::trace!("ExtGState key /{} not applied", other),
            }
        }

        if !transparency.is_empty() {
            list.push(OpCode::SetGState, vec![OpArg::Dict(transparency)])?;
        }
        Ok(())
    }

    /// Resolves a font resource, reusing the descriptor for a known reference.
    fn load_font(&mut self, value: Option<&PDFObject>, label: &str) -> ActiveFont {
        let reference = value.and_then(PDFObject::as_reference);
        if let Some(font) = reference.and_then(|r| self.fonts.get(&r)) {
            return font.clone();
        }

        let dict = match value.map(|v| self.doc.fetch_if_ref(v)) {
            Some(PDFObject::Dictionary(dict)) => dict,
            _ => {
                tracing::warn!("Font /{} is missing, using a substitute", label);
                return self.fallback_font();
            }
        };
        let descriptor = self.doc.font_descriptor(reference, &dict);
        let font = ActiveFont {
            id: self.next_resource_id("font"),
            descriptor,
        };
        if let Some(r) = reference {
            self.fonts.insert(r, font.clone());
        }
        font
    }

    /// Helvetica, used when a font resource is absent.
    fn fallback_font(&mut self) -> ActiveFont {
        if let Some(font) = &self.fallback_font {
            return font.clone();
        }
        let mut dict = Dict::new();
        dict.insert("Type".to_string(), PDFObject::Name("Font".to_string()));
        dict.insert("Subtype".to_string(), PDFObject::Name("Type1".to_string()));
        dict.insert("BaseFont".to_string(), PDFObject::Name("Helvetica".to_string()));
        let font = ActiveFont {
            id: self.next_resource_id("font"),
            descriptor: Arc::new(font::load_font(self.doc, &dict)),
        };
        self.fallback_font = Some(font.clone());
        font
    }

    fn activate_font(
        &mut self,
        font: ActiveFont,
        size: f64,
        ctx: &mut StreamContext<'_>,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<()> {
        list.add_dependency(font.id.clone(), DecodedResource::Font(font.descriptor.clone()));
        list.push(
            OpCode::SetFont,
            vec![OpArg::Resource(font.id.clone()), OpArg::Number(size)],
        )?;
        let state = ctx.state.state_mut();
        state.font = Some(font);
        state.font_size = size;
        Ok(())
    }

    /// Lays out glyphs and advances the text matrix.
    fn show_text(
        &mut self,
        op: OpCode,
        pieces: &[TextPiece<'_>],
        ctx: &mut StreamContext<'_>,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<()> {
        let font = match ctx.state.state().font.clone() {
            Some(font) => font,
            None => {
                tracing::warn!("Text shown before any Tf, using a substitute font");
                let font = self.fallback_font();
                ctx.state.state_mut().font = Some(font.clone());
                font
            }
        };
        list.add_dependency(font.id.clone(), DecodedResource::Font(font.descriptor.clone()));

        if font.descriptor.is_type3() {
            return self.show_type3_text(&font, pieces, ctx, list);
        }

        let mut glyphs = Vec::new();
        for piece in pieces {
            match piece {
                TextPiece::Adjust(n) => apply_adjustment(ctx.state.state_mut(), *n),
                TextPiece::Text(bytes) => {
                    for glyph in font.descriptor.glyphs(bytes) {
                        let state = ctx.state.state_mut();
                        let (x, y) = state.text_position();
                        let tx = glyph_advance(state, &font.descriptor, &glyph);
                        state.advance_text(tx);
                        glyphs.push(PositionedGlyph { glyph, x, y });
                    }
                }
            }
        }
        list.push(op, vec![OpArg::Glyphs(glyphs)])
    }

    /// Type 3 glyphs are painted by running their procedures as forms.
    ///
    /// A glyph that shows text in its own font is an operator fault.
    fn show_type3_text(
        &mut self,
        font: &ActiveFont,
        pieces: &[TextPiece<'_>],
        ctx: &mut StreamContext<'_>,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<()> {
        if self.glyph_chain.contains(&font.id) {
            return Err(PDFError::operator(format!(
                "Type3 font {} draws its own glyphs",
                font.descriptor.name
            )));
        }
        self.glyph_chain.push(font.id.clone());
        let result = self.paint_type3_glyphs(&font.descriptor, pieces, ctx, list);
        self.glyph_chain.pop();
        result
    }

    fn paint_type3_glyphs(
        &mut self,
        descriptor: &Arc<FontDescriptor>,
        pieces: &[TextPiece<'_>],
        ctx: &mut StreamContext<'_>,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<()> {
        let resources = descriptor
            .resources()
            .cloned()
            .unwrap_or_else(|| ctx.resources.clone());

        for piece in pieces {
            match piece {
                TextPiece::Adjust(n) => apply_adjustment(ctx.state.state_mut(), *n),
                TextPiece::Text(bytes) => {
                    for glyph in descriptor.glyphs(bytes) {
                        self.check_cancelled()?;
                        let state = ctx.state.state().clone();
                        if let Some(procedure) = descriptor.char_proc(glyph.code) {
                            let th = state.horizontal_scaling / 100.0;
                            let text_space = graphics_state::multiply(
                                &[state.font_size * th, 0.0, 0.0, state.font_size, 0.0, state.rise],
                                &state.text_matrix,
                            );
                            let matrix = graphics_state::multiply(&descriptor.font_matrix, &text_space);
                            let painted = self.paint_nested(
                                procedure, None, matrix, None, &resources, &state, ctx.depth, list,
                            );
                            if let Err(e) = painted {
                                self.absorb(e)?;
                            }
                        }
                        let tx = glyph_advance(&state, descriptor, &glyph);
                        ctx.state.state_mut().advance_text(tx);
                    }
                }
            }
        }
        Ok(())
    }

    /// `CS`/`cs`: selects a color space and resets the color to its initial value.
    fn set_color_space(
        &mut self,
        stroke: bool,
        space_name: &str,
        ctx: &mut StreamContext<'_>,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<()> {
        let space = self.resolve_paint_space(space_name, ctx.resources)?;
        let color = space.initial_color();
        let state = ctx.state.state_mut();
        if stroke {
            state.stroke_space = space;
            state.stroke_color = color.clone();
        } else {
            state.fill_space = space;
            state.fill_color = color.clone();
        }
        emit_color(stroke, &color, list)
    }

    fn resolve_paint_space(&self, space_name: &str, resources: &Dict) -> PDFResult<PaintSpace> {
        match space_name {
            "DeviceGray" | "G" => return Ok(PaintSpace::Solid(ImageColorSpace::Gray)),
            "DeviceRGB" | "RGB" => return Ok(PaintSpace::Solid(ImageColorSpace::RGB)),
            "DeviceCMYK" | "CMYK" => return Ok(PaintSpace::Solid(ImageColorSpace::CMYK)),
            "Pattern" => return Ok(PaintSpace::Pattern),
            _ => {}
        }
        let value = self
            .resource(resources, "ColorSpace", space_name)
            .map(|value| self.doc.fetch_if_ref(&value))
            .ok_or_else(|| PDFError::operator(format!("Unknown color space /{}", space_name)))?;

        let is_pattern = match &value {
            PDFObject::Name(n) => n == "Pattern",
            PDFObject::Array(items) => items.first().and_then(PDFObject::as_name) == Some("Pattern"),
            _ => false,
        };
        if is_pattern {
            return Ok(PaintSpace::Pattern);
        }
        let resolve = |obj: &PDFObject| self.doc.fetch_if_ref(obj);
        Ok(PaintSpace::Solid(ImageColorSpace::from_object(&value, &resolve)))
    }

    /// `SC`/`SCN`/`sc`/`scn` in the current color space.
    fn set_color(
        &mut self,
        stroke: bool,
        args: &[PDFObject],
        ctx: &mut StreamContext<'_>,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<()> {
        let state = ctx.state.state_mut();
        let space = if stroke { &state.stroke_space } else { &state.fill_space };
        let color = match space {
            PaintSpace::Pattern => {
                let pattern = args
                    .iter()
                    .rev()
                    .find_map(PDFObject::as_name)
                    .ok_or_else(|| PDFError::operator("Pattern color without a pattern name"))?;
                Color::Pattern(pattern.to_string())
            }
            PaintSpace::Solid(cs) => {
                let comps: Vec<f64> = args.iter().filter_map(PDFObject::as_number).collect();
                if comps.len() < cs.components() as usize {
                    return Err(PDFError::operator(format!(
                        "Color needs {} components, got {}",
                        cs.components(),
                        comps.len()
                    )));
                }
                Color::Converted(cs.color_to_rgb(&comps))
            }
        };
        if stroke {
            state.stroke_color = color.clone();
        } else {
            state.fill_color = color.clone();
        }
        emit_color(stroke, &color, list)
    }

    fn set_device_color(
        &mut self,
        stroke: bool,
        space: ImageColorSpace,
        color: Color,
        ctx: &mut StreamContext<'_>,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<()> {
        let state = ctx.state.state_mut();
        if stroke {
            state.stroke_space = PaintSpace::Solid(space);
            state.stroke_color = color.clone();
        } else {
            state.fill_space = PaintSpace::Solid(space);
            state.fill_color = color.clone();
        }
        emit_color(stroke, &color, list)
    }

    /// `Do`: paints an image or runs a form.
    fn paint_xobject(
        &mut self,
        xobject_name: &str,
        ctx: &mut StreamContext<'_>,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<()> {
        let raw = self
            .resource(ctx.resources, "XObject", xobject_name)
            .ok_or_else(|| PDFError::operator(format!("Unknown XObject /{}", xobject_name)))?;
        let reference = raw.as_reference();
        let PDFObject::Stream(stream) = self.doc.fetch_if_ref(&raw) else {
            return Err(PDFError::operator(format!("XObject /{} is not a stream", xobject_name)));
        };

        match stream.get("Subtype").and_then(PDFObject::as_name) {
            Some("Image") => self.paint_image(reference, &stream, false, ctx, list),
            Some("Form") => {
                let matrix = self.matrix_entry(&stream.dict, "Matrix").unwrap_or(IDENTITY);
                let bbox = self.rect_entry(&stream.dict, "BBox");
                let own_resources = self.doc.get_dict(&stream.dict, "Resources");
                let resources = own_resources.as_ref().unwrap_or(ctx.resources);
                let parent = ctx.state.state().clone();
                self.paint_nested(&stream, reference, matrix, bbox, resources, &parent, ctx.depth, list)
            }
            Some("PS") => {
                tracing::debug!("Skipping PostScript XObject /{}", xobject_name);
                Ok(())
            }
            other => Err(PDFError::operator(format!(
                "XObject /{} has unsupported subtype {:?}",
                xobject_name, other
            ))),
        }
    }

    /// Runs a form or glyph procedure with a copy of the caller's state.
    ///
    /// The caller's state is never modified; the child's saves are closed
    /// before `PaintFormXObjectEnd` is emitted.
    #[allow(clippy::too_many_arguments)]
    fn paint_nested(
        &mut self,
        stream: &PdfStream,
        reference: Option<Ref>,
        matrix: Matrix,
        bbox: Option<[f64; 4]>,
        resources: &Dict,
        parent: &GraphicsState,
        depth: usize,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<()> {
        if depth >= self.options.max_form_depth {
            return Err(PDFError::operator(format!(
                "Forms nested deeper than {}",
                self.options.max_form_depth
            )));
        }
        if let Some(r) = reference {
            if self.form_chain.contains(&r) {
                return Err(PDFError::operator(format!("Form {} paints itself", r)));
            }
        }
        let content = self.doc.get_stream_bytes(stream)?;

        list.push(
            OpCode::PaintFormXObjectBegin,
            vec![
                OpArg::numbers(&matrix),
                bbox.map_or(OpArg::Null, |b| OpArg::numbers(&b)),
            ],
        )?;

        let mut child = parent.clone();
        child.concat_matrix(&matrix);
        if let Some(b) = bbox {
            let clip = graphics_state::transform_rect(&child.ctm, &b);
            child.intersect_clip(clip);
        }

        if let Some(r) = reference {
            self.form_chain.push(r);
        }
        let result = self.run_stream(&content, resources, child, depth + 1, list);
        if reference.is_some() {
            self.form_chain.pop();
        }
        result?;

        list.push(OpCode::PaintFormXObjectEnd, vec![])
    }

    fn matrix_entry(&self, dict: &Dict, key: &str) -> Option<Matrix> {
        let values = self.number_array(dict, key)?;
        values.try_into().ok()
    }

    /// A rectangle entry normalized to `[min_x, min_y, max_x, max_y]`.
    fn rect_entry(&self, dict: &Dict, key: &str) -> Option<[f64; 4]> {
        let values: [f64; 4] = self.number_array(dict, key)?.try_into().ok()?;
        Some([
            values[0].min(values[2]),
            values[1].min(values[3]),
            values[0].max(values[2]),
            values[1].max(values[3]),
        ])
    }

    fn number_array(&self, dict: &Dict, key: &str) -> Option<Vec<f64>> {
        let value = self.doc.get_dict_value(dict, key)?;
        value
            .as_array()?
            .iter()
            .map(|item| self.doc.fetch_if_ref(item).as_number())
            .collect()
    }

    /// Decodes (or reuses) an image and emits the paint operator.
    fn paint_image(
        &mut self,
        reference: Option<Ref>,
        stream: &PdfStream,
        inline: bool,
        ctx: &mut StreamContext<'_>,
        list: &mut OperatorList<'_>,
    ) -> PDFResult<()> {
        let cached = reference.and_then(|r| self.images.get(&r)).cloned();
        let (id, image) = match cached {
            Some(entry) => entry,
            None => {
                let image = Arc::new(self.decode_image(stream, ctx.resources));
                let id = self.next_resource_id(if inline { "inline" } else { "img" });
                if let Some(r) = reference {
                    self.images.insert(r, (id.clone(), image.clone()));
                }
                (id, image)
            }
        };

        let op = if image.is_mask {
            OpCode::PaintImageMaskXObject
        } else if inline {
            OpCode::PaintInlineImageXObject
        } else {
            OpCode::PaintImageXObject
        };
        let (width, height) = (image.width, image.height);
        list.add_dependency(id.clone(), DecodedResource::Image(image));
        list.push(
            op,
            vec![
                OpArg::Resource(id),
                OpArg::Number(width as f64),
                OpArg::Number(height as f64),
            ],
        )
    }

    /// Never fails: undecodable or oversized images become placeholders.
    fn decode_image(&self, stream: &PdfStream, resources: &Dict) -> DecodedImage {
        let width = self.image_int(stream, &["Width", "W"]).unwrap_or(0).clamp(0, u32::MAX as i64) as u32;
        let height = self.image_int(stream, &["Height", "H"]).unwrap_or(0).clamp(0, u32::MAX as i64) as u32;
        if width == 0 || height == 0 {
            tracing::warn!("Image has no usable dimensions ({}x{})", width, height);
            return DecodedImage::placeholder(width, height);
        }
        if width as u64 * height as u64 > self.options.max_image_pixels {
            tracing::warn!("Image {}x{} exceeds the pixel limit, using a placeholder", width, height);
            return DecodedImage::placeholder(width, height);
        }
        match self.image_samples(stream, resources, width, height) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!("Image decode failed ({}), using a placeholder", e);
                DecodedImage::placeholder(width, height)
            }
        }
    }

    fn image_entry(&self, stream: &PdfStream, keys: &[&str]) -> Option<PDFObject> {
        keys.iter()
            .find_map(|key| stream.get(key))
            .map(|value| self.doc.fetch_if_ref(value))
    }

    fn image_int(&self, stream: &PdfStream, keys: &[&str]) -> Option<i64> {
        self.image_entry(stream, keys)?.as_int()
    }

    fn image_samples(
        &self,
        stream: &PdfStream,
        resources: &Dict,
        width: u32,
        height: u32,
    ) -> PDFResult<DecodedImage> {
        let resolve = |obj: &PDFObject| self.doc.fetch_if_ref(obj);
        let (filters, _) = decode::filter_chain(&stream.dict, &resolve);
        if filters
            .last()
            .is_some_and(|f| f.category() == FilterCategory::ImageCodec)
        {
            return match self.doc.decode_stream(stream)? {
                Decoded::Image(image) => Ok(image),
                Decoded::Bytes(_) => Err(PDFError::syntax("image codec produced no samples")),
            };
        }

        let data = self.doc.get_stream_bytes(stream)?;
        let is_mask = self
            .image_entry(stream, &["ImageMask", "IM"])
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if is_mask {
            let inverted = self
                .image_entry(stream, &["Decode", "D"])
                .and_then(|d| d.as_array().and_then(|a| a.first()).and_then(PDFObject::as_number))
                == Some(1.0);
            return Ok(image::decode_image_mask(&data, width, height, inverted));
        }

        let bpc = self.image_int(stream, &["BitsPerComponent", "BPC"]).unwrap_or(8);
        let bpc = u8::try_from(bpc).map_err(|_| PDFError::syntax(format!("BitsPerComponent {}", bpc)))?;
        let space_obj = self
            .image_entry(stream, &["ColorSpace", "CS"])
            .unwrap_or_else(|| PDFObject::Name("DeviceGray".to_string()));
        let space_obj = match &space_obj {
            PDFObject::Name(n) => self
                .resource(resources, "ColorSpace", n)
                .map(|value| self.doc.fetch_if_ref(&value))
                .unwrap_or(space_obj),
            _ => space_obj,
        };
        let space = ImageColorSpace::from_object(&space_obj, &resolve);
        image::decode_raw_image(&data, width, height, bpc, &space)
    }
}

fn emit_color(stroke: bool, color: &Color, list: &mut OperatorList<'_>) -> PDFResult<()> {
    match color {
        Color::Pattern(pattern) if pattern.is_empty() => Ok(()),
        Color::Pattern(pattern) => {
            let op = if stroke { OpCode::SetStrokeColorN } else { OpCode::SetFillColorN };
            list.push(op, vec![OpArg::Name(pattern.clone())])
        }
        solid => {
            let rgb = solid.to_rgb().unwrap_or([0, 0, 0]);
            let op = if stroke { OpCode::SetStrokeRGBColor } else { OpCode::SetFillRGBColor };
            list.push(op, vec![OpArg::Rgb(rgb)])
        }
    }
}

/// Horizontal displacement after one glyph, in unscaled text space.
fn glyph_advance(state: &GraphicsState, font: &FontDescriptor, glyph: &Glyph) -> f64 {
    let w0 = font.advance(glyph.code);
    let spacing = state.char_spacing + if glyph.is_space { state.word_spacing } else { 0.0 };
    (w0 * state.font_size + spacing) * state.horizontal_scaling / 100.0
}

fn apply_adjustment(state: &mut GraphicsState, thousandths: f64) {
    let tx = -thousandths / 1000.0 * state.font_size * state.horizontal_scaling / 100.0;
    state.advance_text(tx);
}

fn dash_pattern(array: &PDFObject, phase: &PDFObject) -> PDFResult<(Vec<f64>, f64)> {
    let dashes = array
        .as_array()
        .and_then(|items| items.iter().map(PDFObject::as_number).collect::<Option<Vec<f64>>>())
        .ok_or_else(|| PDFError::operator("Dash array must hold numbers"))?;
    let phase = phase
        .as_number()
        .ok_or_else(|| PDFError::operator("Dash phase must be a number"))?;
    Ok((dashes, phase))
}

fn number(args: &[PDFObject], i: usize) -> PDFResult<f64> {
    args.get(i)
        .and_then(PDFObject::as_number)
        .ok_or_else(|| PDFError::operator(format!("Operand {} is not a number", i)))
}

fn numbers<const N: usize>(args: &[PDFObject]) -> PDFResult<[f64; N]> {
    let mut out = [0.0; N];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = number(args, i)?;
    }
    Ok(out)
}

fn name(args: &[PDFObject], i: usize) -> PDFResult<&str> {
    args.get(i)
        .and_then(PDFObject::as_name)
        .ok_or_else(|| PDFError::operator(format!("Operand {} is not a name", i)))
}

fn string(args: &[PDFObject], i: usize) -> PDFResult<&[u8]> {
    args.get(i)
        .and_then(PDFObject::as_bytes)
        .ok_or_else(|| PDFError::operator(format!("Operand {} is not a string", i)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operator_list::{OperatorChunk, OperatorEntry};

    /// Lays out numbered objects and a matching xref table.
    fn build_pdf(objects: &[String]) -> Vec<u8> {
        let mut data = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(data.len());
            data.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref_pos = data.len();
        data.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for off in offsets {
            data.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        data.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_pos
            )
            .as_bytes(),
        );
        data
    }

    fn stream(dict: &str, content: &str) -> String {
        format!("<< {} /Length {} >>\nstream\n{}\nendstream", dict, content.len(), content)
    }

    /// One page with `content`, a Helvetica font /F1 (obj 5) and any extra
    /// objects starting at number 6.
    fn page_doc(content: &str, resources: &str, extra: &[String]) -> PDFDocument {
        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 200] /Contents 4 0 R \
                 /Resources << /Font << /F1 5 0 R >> {} >> >>",
                resources
            ),
            stream("", content),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        ];
        objects.extend_from_slice(extra);
        PDFDocument::open(build_pdf(&objects)).unwrap()
    }

    fn run(doc: &PDFDocument) -> Vec<OperatorChunk> {
        let page = doc.get_page(0).unwrap();
        let mut chunks: Vec<OperatorChunk> = Vec::new();
        PartialEvaluator::new(doc, EvaluatorOptions::default())
            .get_operator_list(&page, &mut chunks)
            .unwrap();
        chunks
    }

    fn entries(chunks: &[OperatorChunk]) -> Vec<OperatorEntry> {
        chunks.iter().flat_map(|c| c.entries.clone()).collect()
    }

    fn ops(chunks: &[OperatorChunk]) -> Vec<OpCode> {
        entries(chunks).into_iter().map(|e| e.op).collect()
    }

    #[test]
    fn test_unknown_operator_does_not_stop_painting() {
        let doc = page_doc("0 0 10 10 re foo f", "", &[]);
        assert_eq!(ops(&run(&doc)), vec![OpCode::Rectangle, OpCode::Fill]);
    }

    #[test]
    fn test_excess_restore_keeps_entry_state() {
        let doc = page_doc("", "", &[]);
        let mut chunks: Vec<OperatorChunk> = Vec::new();
        let mut list = OperatorList::new(&mut chunks, 100);
        let mut evaluator = PartialEvaluator::new(&doc, EvaluatorOptions::default());
        let initial = GraphicsState::with_ctm([2.0, 0.0, 0.0, 2.0, 5.0, 5.0]);

        let final_state = evaluator
            .evaluate(b"q 3 w Q Q Q", &Dict::new(), initial.clone(), &mut list)
            .unwrap();
        list.finish().unwrap();

        assert_eq!(final_state, initial);
        assert_eq!(ops(&chunks), vec![OpCode::Save, OpCode::SetLineWidth, OpCode::Restore]);
    }

    #[test]
    fn test_unbalanced_save_closed_at_end() {
        let doc = page_doc("q q 0 0 m", "", &[]);
        let emitted = ops(&run(&doc));
        assert_eq!(
            emitted,
            vec![OpCode::Save, OpCode::Save, OpCode::MoveTo, OpCode::Restore, OpCode::Restore]
        );
    }

    #[test]
    fn test_text_advances_by_widths() {
        let doc = page_doc("BT /F1 10 Tf 100 700 Td (AA) Tj ET", "", &[]);
        let chunks = run(&doc);
        let all = entries(&chunks);
        let show = all.iter().find(|e| e.op == OpCode::ShowText).unwrap();
        let glyphs = show.args[0].as_glyphs().unwrap();
        assert_eq!(glyphs.len(), 2);
        assert_eq!((glyphs[0].x, glyphs[0].y), (100.0, 700.0));
        // Helvetica 'A' is 667 units wide
        assert!((glyphs[1].x - 106.67).abs() < 1e-9);

        let fonts: Vec<_> = chunks.iter().flat_map(|c| c.resources.iter()).collect();
        assert_eq!(fonts.len(), 1);
    }

    #[test]
    fn test_spaced_text_adjustment_and_word_spacing() {
        let doc = page_doc("BT /F1 10 Tf 5 Tw [(A) -1000 ( ) (A)] TJ ET", "", &[]);
        let all = entries(&run(&doc));
        let show = all.iter().find(|e| e.op == OpCode::ShowSpacedText).unwrap();
        let glyphs = show.args[0].as_glyphs().unwrap();
        assert_eq!(glyphs.len(), 3);
        // 6.67 for 'A' plus 10 for the -1000 adjustment
        assert!((glyphs[1].x - 16.67).abs() < 1e-9);
        // Space is 278 units plus 5 word spacing
        assert!((glyphs[2].x - (16.67 + 2.78 + 5.0)).abs() < 1e-9);
    }

    #[test]
    fn test_missing_width_defaults() {
        let font = "<< /Type /Font /Subtype /Type1 /BaseFont /Custom \
                    /FirstChar 65 /LastChar 65 /Widths [500] >>";
        let doc = page_doc(
            "BT /F2 10 Tf (A\\001) Tj ET",
            "/Font << /F2 6 0 R >>",
            &[font.to_string()],
        );
        let all = entries(&run(&doc));
        let glyphs = all
            .iter()
            .find(|e| e.op == OpCode::ShowText)
            .and_then(|e| e.args[0].as_glyphs())
            .unwrap();
        assert_eq!(glyphs[0].glyph.width, 500.0);
        assert_eq!(glyphs[1].glyph.width, 250.0);
    }

    #[test]
    fn test_missing_font_uses_substitute() {
        let doc = page_doc("BT /Nope 12 Tf (A) Tj ET", "", &[]);
        let chunks = run(&doc);
        let all = entries(&chunks);
        let set_font = all.iter().find(|e| e.op == OpCode::SetFont).unwrap();
        let id = set_font.args[0].as_resource().unwrap();
        let (_, resource) = chunks
            .iter()
            .flat_map(|c| c.resources.iter())
            .find(|(rid, _)| rid == id)
            .unwrap();
        let DecodedResource::Font(font) = resource else {
            panic!("expected font");
        };
        assert_eq!(font.name, "Helvetica");
    }

    #[test]
    fn test_form_runs_with_copied_state() {
        let form = stream(
            "/Type /XObject /Subtype /Form /BBox [0 0 10 10] /Matrix [1 0 0 1 50 50]",
            "5 w q 0 0 m Q Q Q",
        );
        let doc = page_doc(
            "2 w /Fm0 Do 0 0 m",
            "/XObject << /Fm0 6 0 R >>",
            &[form],
        );
        let all = entries(&run(&doc));
        let emitted: Vec<OpCode> = all.iter().map(|e| e.op).collect();
        assert_eq!(
            emitted,
            vec![
                OpCode::SetLineWidth,
                OpCode::PaintFormXObjectBegin,
                OpCode::SetLineWidth,
                OpCode::Save,
                OpCode::MoveTo,
                OpCode::Restore,
                OpCode::PaintFormXObjectEnd,
                OpCode::MoveTo,
            ]
        );
        assert_eq!(all[1].args[0], OpArg::numbers(&[1.0, 0.0, 0.0, 1.0, 50.0, 50.0]));
    }

    #[test]
    fn test_self_referencing_form_stops() {
        let form = stream("/Type /XObject /Subtype /Form /Resources << /XObject << /Me 6 0 R >> >>", "/Me Do");
        let doc = page_doc("/Me Do", "/XObject << /Me 6 0 R >>", &[form]);
        let page = doc.get_page(0).unwrap();
        let mut chunks: Vec<OperatorChunk> = Vec::new();
        let mut evaluator = PartialEvaluator::new(&doc, EvaluatorOptions::default());
        evaluator.get_operator_list(&page, &mut chunks).unwrap();

        let emitted = ops(&chunks);
        assert_eq!(emitted, vec![OpCode::PaintFormXObjectBegin, OpCode::PaintFormXObjectEnd]);
        assert_eq!(evaluator.fault_count(), 1);
    }

    #[test]
    fn test_type3_glyph_showing_its_own_font_stops() {
        let font = "<< /Type /Font /Subtype /Type3 /FontMatrix [0.001 0 0 0.001 0 0] \
                    /FontBBox [0 0 1000 1000] /FirstChar 65 /LastChar 65 /Widths [1000] \
                    /Encoding << /Differences [65 /a] >> /CharProcs << /a 7 0 R >> \
                    /Resources << /Font << /T3 6 0 R >> >> >>"
            .to_string();
        let glyph = stream("", "1000 0 d0 BT /T3 1 Tf (AAAA) Tj ET 0 0 10 10 re f");
        let doc = page_doc("BT /T3 12 Tf (AAAA) Tj ET", "/Font << /T3 6 0 R >>", &[font, glyph]);
        let page = doc.get_page(0).unwrap();
        let mut chunks: Vec<OperatorChunk> = Vec::new();
        let mut evaluator = PartialEvaluator::new(&doc, EvaluatorOptions::default());
        evaluator.get_operator_list(&page, &mut chunks).unwrap();

        let emitted = ops(&chunks);
        let begins = emitted.iter().filter(|op| **op == OpCode::PaintFormXObjectBegin).count();
        let fills = emitted.iter().filter(|op| **op == OpCode::Fill).count();
        assert_eq!(begins, 4);
        assert_eq!(fills, 4);
        assert_eq!(evaluator.fault_count(), 4);
    }

    #[test]
    fn test_inline_image_is_decoded() {
        let doc = page_doc(
            "q BI /W 2 /H 1 /CS /G /BPC 8 /F /AHx ID 00FF> EI Q",
            "",
            &[],
        );
        let chunks = run(&doc);
        let all = entries(&chunks);
        assert_eq!(
            all.iter().map(|e| e.op).collect::<Vec<_>>(),
            vec![OpCode::Save, OpCode::PaintInlineImageXObject, OpCode::Restore]
        );
        let (_, resource) = &chunks[0].resources[0];
        let DecodedResource::Image(image) = resource else {
            panic!("expected image");
        };
        assert_eq!((image.width, image.height, image.channels), (2, 1, 1));
        assert_eq!(image.data, vec![0, 255]);
    }

    #[test]
    fn test_image_xobject_decoded_once() {
        let img = stream(
            "/Type /XObject /Subtype /Image /Width 1 /Height 1 /ColorSpace /DeviceRGB /BitsPerComponent 8",
            "\u{1}\u{2}\u{3}",
        );
        let doc = page_doc("/Im0 Do /Im0 Do", "/XObject << /Im0 6 0 R >>", &[img]);
        let chunks = run(&doc);
        let all = entries(&chunks);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].args[0], all[1].args[0]);
        let images: Vec<_> = chunks.iter().flat_map(|c| c.resources.iter()).collect();
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn test_colors_normalized_to_rgb() {
        let doc = page_doc("1 0 0 rg 0 g 0 0 0 1 K /DeviceRGB cs 0 1 0 sc", "", &[]);
        let all = entries(&run(&doc));
        let colors: Vec<OpArg> = all.iter().map(|e| e.args[0].clone()).collect();
        assert_eq!(
            colors,
            vec![
                OpArg::Rgb([255, 0, 0]),
                OpArg::Rgb([0, 0, 0]),
                OpArg::Rgb([0, 0, 0]),
                OpArg::Rgb([0, 0, 0]),
                OpArg::Rgb([0, 255, 0]),
            ]
        );
    }

    #[test]
    fn test_extgstate_expands_to_operators() {
        let doc = page_doc(
            "/GS0 gs",
            "/ExtGState << /GS0 << /LW 4 /ca 0.5 >> >>",
            &[],
        );
        let all = entries(&run(&doc));
        assert_eq!(all[0].op, OpCode::SetLineWidth);
        assert_eq!(all[1].op, OpCode::SetGState);
        assert_eq!(all[1].args[0], OpArg::Dict(vec![("ca".into(), OpArg::Number(0.5))]));
    }

    #[test]
    fn test_strict_mode_propagates_faults() {
        let doc = page_doc("0 0 m foo", "", &[]);
        let page = doc.get_page(0).unwrap();
        let mut chunks: Vec<OperatorChunk> = Vec::new();
        let options = EvaluatorOptions {
            ignore_errors: false,
            ..EvaluatorOptions::default()
        };
        let err = PartialEvaluator::new(&doc, options)
            .get_operator_list(&page, &mut chunks)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperatorFault);
    }

    #[test]
    fn test_cancelled_before_start() {
        let doc = page_doc("0 0 m", "", &[]);
        let page = doc.get_page(0).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let mut chunks: Vec<OperatorChunk> = Vec::new();
        let result = PartialEvaluator::new(&doc, EvaluatorOptions::default())
            .with_cancellation(token)
            .get_operator_list(&page, &mut chunks);
        assert_eq!(result, Err(PDFError::Cancelled));
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_chunks_respect_size() {
        let content = "0 0 m ".repeat(25);
        let doc = page_doc(&content, "", &[]);
        let page = doc.get_page(0).unwrap();
        let mut chunks: Vec<OperatorChunk> = Vec::new();
        let count = PartialEvaluator::new(&doc, EvaluatorOptions::default().with_chunk_size(10))
            .get_operator_list(&page, &mut chunks)
            .unwrap();
        assert_eq!(count, 25);
        assert_eq!(
            chunks.iter().map(|c| c.entries.len()).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        assert!(chunks.last().unwrap().last);
    }
}
