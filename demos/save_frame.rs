use rgbd_capture::{CaptureConfig, RgbdCapture, RgbdFrame, SyntheticRuntime};
use std::fs;
use std::io::Write;
use std::sync::Arc;

fn save_color_as_ppm(frame: &RgbdFrame, filename: &str) -> std::io::Result<()> {
    let mut file = fs::File::create(filename)?;
    writeln!(file, "P6\n{} {}\n255", frame.width, frame.height)?;
    file.write_all(frame.color)?;
    Ok(())
}

fn save_depth_as_pgm(frame: &RgbdFrame, filename: &str) -> std::io::Result<()> {
    let max = frame.depth.iter().cloned().fold(0.0f32, f32::max);
    let scale = if max > 0.0 { 255.0 / max } else { 0.0 };

    let mut file = fs::File::create(filename)?;
    writeln!(file, "P5\n{} {}\n255", frame.width, frame.height)?;
    let gray: Vec<u8> = frame.depth.iter().map(|&d| (d * scale) as u8).collect();
    file.write_all(&gray)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let runtime = Arc::new(SyntheticRuntime::new());
    let mut capture = RgbdCapture::open(runtime, CaptureConfig::default())?;

    // Let a few frames arrive before snapshotting.
    std::thread::sleep(std::time::Duration::from_millis(200));
    capture.grab();
    let frame = capture.retrieve();

    save_color_as_ppm(&frame, "color.ppm")?;
    save_depth_as_pgm(&frame, "depth.pgm")?;
    println!(
        "saved color.ppm and depth.pgm at {}x{}",
        frame.width, frame.height
    );

    capture.shutdown()?;
    Ok(())
}
