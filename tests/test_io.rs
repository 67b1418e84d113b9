// tests/test_io.rs — Session snapshots, PNG frames and GIF export.

use latentdrag::config::{Point, RenderArgs, SessionKey};
use latentdrag::error::ErrorKind;
use latentdrag::io::{encode_animated_gif, frame_path, load_snapshot, save_png_frame, save_snapshot, SessionSnapshot};
use latentdrag::renderer::Renderer;
use latentdrag::resources::Resources;
use image::{Rgb, RgbImage};
use ndarray::Array2;

fn sample_snapshot() -> SessionSnapshot {
    SessionSnapshot {
        key: SessionKey { model: "procedural-64".into(), seed: 9, w_plus: true },
        lr: 0.005,
        w: Array2::from_shape_fn((10, 24), |(r, c)| (r * 24 + c) as f32 * 0.01),
        w0: Array2::zeros((10, 24)),
        points: vec![Point::new(12, 40)],
        targets: vec![Point::new(30, 40)],
    }
}

#[test]
fn snapshot_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drag.lds");
    let snap = sample_snapshot();
    save_snapshot(&snap, &path).unwrap();

    let raw = std::fs::read(&path).unwrap();
    assert_eq!(&raw[8..12], b"LDS1");
    assert_eq!(load_snapshot(&path).unwrap(), snap);
}

#[test]
fn foreign_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let short = dir.path().join("short.lds");
    std::fs::write(&short, b"LDS1").unwrap();
    assert_eq!(load_snapshot(&short).unwrap_err().kind(), ErrorKind::Serialize);

    let foreign = dir.path().join("project.pfe");
    let mut bytes = vec![4, 0, 0, 0, 0, 0, 0, 0];
    bytes.extend_from_slice(b"PFE1");
    bytes.extend_from_slice(&[0; 16]);
    std::fs::write(&foreign, bytes).unwrap();
    let err = load_snapshot(&foreign).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Serialize);
    assert!(err.to_string().contains("PFE1"));

    let missing = dir.path().join("missing.lds");
    assert_eq!(load_snapshot(&missing).unwrap_err().kind(), ErrorKind::Io);
}

#[test]
fn renderer_snapshot_restores_the_same_image() {
    let args = RenderArgs {
        model: "procedural-64".into(),
        lr: 0.02,
        r1: 24.0,
        r2: 48.0,
        points: vec![Point::new(32, 32)],
        targets: vec![Point::new(40, 32)],
        is_drag: true,
        ..RenderArgs::default()
    };
    let mut r = Renderer::new(Resources::shared());
    let mut current = args.clone();
    for _ in 0..3 {
        let res = r.render(&current);
        assert!(res.error.is_none(), "{:?}", res.error);
        current.points = res.points.unwrap();
    }
    let snap = r.snapshot(&current.targets).unwrap();
    assert_eq!(snap.points, current.points);
    assert_eq!(snap.lr, 0.02);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.lds");
    save_snapshot(&snap, &path).unwrap();

    let mut resumed = Renderer::new(Resources::shared());
    resumed.restore(&load_snapshot(&path).unwrap(), &RenderArgs::default()).unwrap();
    assert_eq!(resumed.session().unwrap().latent(), r.session().unwrap().latent());

    let view = RenderArgs { is_drag: false, ..current.clone() };
    let a = r.render(&view);
    let b = resumed.render(&view);
    assert!(!b.init_net);
    assert_eq!(a.image, b.image);
}

#[test]
fn restore_rejects_mismatched_latents() {
    let mut snap = sample_snapshot();
    snap.w = Array2::zeros((4, 24));
    let mut r = Renderer::new(Resources::shared());
    let err = r.restore(&snap, &RenderArgs::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RuntimeComputation);
    assert!(!r.is_initialized());
}

#[test]
fn png_frames_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = frame_path(dir.path(), 7);
    assert!(path.ends_with("frame_00007.png"));

    let img = RgbImage::from_pixel(8, 4, Rgb([10, 200, 30]));
    save_png_frame(&img, &path).unwrap();
    let back = image::open(&path).unwrap().into_rgb8();
    assert_eq!(back, img);
}

#[test]
fn gif_export_writes_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drag.gif");
    let frames: Vec<RgbImage> = (0..4)
        .map(|i| RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, i * 60])))
        .collect();
    encode_animated_gif(&frames, 12.0, &path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..6], b"GIF89a");

    let mut decoder = gif::DecodeOptions::new().read_info(std::fs::File::open(&path).unwrap()).unwrap();
    let mut count = 0;
    while decoder.read_next_frame().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 4);
}

#[test]
fn gif_export_rejects_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.gif");
    assert!(encode_animated_gif(&[], 10.0, &path).is_err());

    let mixed = vec![RgbImage::new(8, 8), RgbImage::new(4, 4)];
    assert_eq!(encode_animated_gif(&mixed, 10.0, &path).unwrap_err().kind(), ErrorKind::Serialize);
}
