use strata_core::{BlendMode, Color, FrameBuffer, Rect, TaskId};
use strata_fx::{build_pass_graph, PluginRegistry};
use strata_ir::{Document, Layer, ParamValue};
use strata_render::{Compositor, ExecControl, Frame, RenderJob, Surface, SurfaceConfig};

/// Render a document through the full pass graph and return the frame.
fn run_conformance_test(doc: &Document) -> Frame {
    let graph = build_pass_graph(doc, &PluginRegistry::builtin());
    let job = RenderJob::new(TaskId::new(), 1, doc.clone(), graph);
    let mut surface = Surface::new(SurfaceConfig {
        width: doc.width,
        height: doc.height,
    });
    Compositor::new()
        .render_frame(&job, &mut surface, &ExecControl::new())
        .expect("render should succeed in conformance test")
}

#[test]
fn test_conformance_01_solid_color() {
    let doc = Document::new(32, 24).with_layer(Layer::solid("bg", Color::RED));
    let frame = run_conformance_test(&doc);
    let expected = FrameBuffer::solid(32, 24, &Color::RED);
    assert_eq!(frame.hash, expected.content_hash(), "conformance hash mismatch");
}

#[test]
fn test_conformance_02_placed_solid() {
    let doc = Document::new(8, 8)
        .with_layer(Layer::solid("bg", Color::BLACK))
        .with_layer(Layer::solid("box", Color::WHITE).with_placement(Rect::new(2, 2, 4, 4)));
    let frame = run_conformance_test(&doc);

    let mut expected = FrameBuffer::solid(8, 8, &Color::BLACK);
    for y in 2..6 {
        for x in 2..6 {
            expected.set_pixel(x, y, [255, 255, 255, 255]);
        }
    }
    assert_eq!(frame.buffer, expected);
    assert_eq!(frame.hash, expected.content_hash());
}

#[test]
fn test_conformance_03_identity_raster() {
    let mut image = FrameBuffer::new(4, 4);
    for y in 0..4 {
        for x in 0..4 {
            image.set_pixel(x, y, [(x * 60) as u8, (y * 60) as u8, 90, 255]);
        }
    }
    let doc = Document::new(4, 4).with_layer(Layer::raster("photo", image.clone()));
    let frame = run_conformance_test(&doc);
    assert_eq!(frame.buffer, image);
}

#[test]
fn test_conformance_04_half_opacity() {
    let doc = Document::new(2, 2)
        .with_layer(Layer::solid("bg", Color::BLACK))
        .with_layer(Layer::solid("top", Color::WHITE).with_opacity(50.0));
    let frame = run_conformance_test(&doc);
    let px = frame.buffer.get_pixel(0, 0).unwrap();
    // Half-way in encoded space.
    assert!((127..=128).contains(&px[0]));
    assert_eq!(px[0], px[1]);
    assert_eq!(px[3], 255);
}

#[test]
fn test_conformance_05_screen_blend() {
    let doc = Document::new(1, 1)
        .with_layer(Layer::solid("bg", Color::rgb(0.0, 0.0, 1.0)))
        .with_layer(Layer::solid("top", Color::RED).with_blend_mode(BlendMode::Screen));
    let frame = run_conformance_test(&doc);
    assert_eq!(frame.buffer.get_pixel(0, 0), Some([255, 0, 255, 255]));
}

#[test]
fn test_conformance_06_global_brightness() {
    let grey = Color::rgb(0.5, 0.5, 0.5);
    let mut doc = Document::new(2, 2).with_layer(Layer::solid("bg", grey));
    doc.global_params
        .insert("brightness".into(), ParamValue::Scalar(50.0));
    let dimmed = run_conformance_test(&doc);

    let plain = Document::new(2, 2).with_layer(Layer::solid("bg", grey));
    let reference = run_conformance_test(&plain);

    let a = dimmed.buffer.get_pixel(0, 0).unwrap();
    let b = reference.buffer.get_pixel(0, 0).unwrap();
    assert!(a[0] < b[0]);
    assert_eq!(a[3], 255);
}

#[test]
fn test_conformance_07_deterministic_effects() {
    let doc = Document::new(24, 24)
        .with_layer(Layer::solid("bg", Color::rgb(0.1, 0.3, 0.5)))
        .with_layer(
            Layer::solid("dot", Color::WHITE)
                .with_placement(Rect::new(6, 6, 12, 12))
                .with_param("blur", 4.0f32)
                .with_param("sepia", 60.0f32)
                .with_param("grain", 30.0f32)
                .with_param("vignette", 40.0f32),
        );
    let first = run_conformance_test(&doc);
    let second = run_conformance_test(&doc);
    assert_eq!(first.hash, second.hash);
    assert_eq!(first.buffer, second.buffer);
}
