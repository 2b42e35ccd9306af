use rgbd_capture::{CaptureConfig, RgbdCapture, SyntheticRuntime};
use std::sync::Arc;

fn main() -> rgbd_capture::Result<()> {
    env_logger::init();

    let runtime = Arc::new(SyntheticRuntime::new());
    let mut capture = RgbdCapture::open(runtime, CaptureConfig::default())?;

    for i in 0..100 {
        std::thread::sleep(std::time::Duration::from_millis(40));
        capture.grab();
        let frame = capture.retrieve();
        let center = frame
            .depth_at(frame.width / 2, frame.height / 2)
            .unwrap_or(0.0);
        println!(
            "frame {:3}: {}x{} center depth {:.3} m health {:?}",
            i,
            frame.width,
            frame.height,
            center,
            capture.health()
        );
    }

    let stats = capture.stats();
    println!(
        "color: {} frames ({} dropped), depth: {} frames ({} dropped)",
        stats.color_frames, stats.color_dropped, stats.depth_frames, stats.depth_dropped
    );

    let clean = capture.shutdown()?;
    println!("runtime stopped cleanly: {}", clean);
    Ok(())
}
