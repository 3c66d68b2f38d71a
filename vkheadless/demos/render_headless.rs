//! Renders a colored triangle without any window or surface, reads the result
//! back, and writes it to disk.
//!
//! Usage: `cargo run --example render-headless -- [out-path] [--size WxH]
//! [--silent]`
//!
//! The output is always a binary PPM (`headless.ppm` by default). If the path
//! ends in `.png`, a PNG is written there as well, with the PPM next to it.
#[path = "../tests/common/mod.rs"]
mod common;

use anyhow::{Context as _, Result};
use std::{
    fs::File,
    io::{BufWriter, Write as _},
    path::{Path, PathBuf},
};
use vkheadless::{
    Extent2D, PixelReader,
    context::{ContextConfig, HeadlessContext},
};

/// What to render and where to put it.
#[derive(Debug)]
struct RenderSettings {
    width: u32,
    height: u32,
    clear_color: [f32; 4],
    output: PathBuf,
    silent: bool,
}
impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 2048,
            height: 1536,
            clear_color: common::CLEAR_COLOR,
            output: PathBuf::from("headless.ppm"),
            silent: false,
        }
    }
}
impl RenderSettings {
    fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut settings = Self::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--silent" => settings.silent = true,
                "--size" => {
                    let size = args.next().context("--size needs a value")?;
                    let (width, height) = size
                        .split_once('x')
                        .with_context(|| format!("size {size:?} isn't WxH"))?;
                    settings.width = width.parse().context("bad width")?;
                    settings.height = height.parse().context("bad height")?;
                }
                flag if flag.starts_with("--") => anyhow::bail!("unknown flag {flag}"),
                path => settings.output = PathBuf::from(path),
            }
        }
        Ok(settings)
    }
}

/// How loudly to die.
struct FatalErrorPolicy {
    /// Only print the outermost message, without the chain of causes.
    silent: bool,
}

/// Report `err` according to `policy` and exit. The exit code is the raw
/// `VkResult` if that's what went wrong, else 1.
fn exit_fatal(policy: &FatalErrorPolicy, err: anyhow::Error) -> ! {
    if policy.silent {
        eprintln!("{err}");
    } else {
        log::error!("{err:?}");
        eprintln!("fatal: {err:?}");
    }
    let code = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<vkheadless::vk::Result>())
        .map_or(1, |result| result.as_raw());
    std::process::exit(code)
}

fn write_ppm(path: &Path, pixels: &PixelReader) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write!(file, "P6\n{}\n{}\n255\n", pixels.width(), pixels.height())?;
    for row in pixels.rgb_rows() {
        for rgb in row {
            file.write_all(&rgb)?;
        }
    }
    file.flush()?;
    Ok(())
}

fn write_png(path: &Path, pixels: &PixelReader) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    let mut encoder = png::Encoder::new(file, pixels.width(), pixels.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&pixels.to_rgba8())?;
    writer.finish()?;
    Ok(())
}

fn run(settings: &RenderSettings) -> Result<()> {
    let extent = Extent2D::new(settings.width, settings.height)
        .context("width and height must be non-zero")?;
    let mut context = unsafe {
        HeadlessContext::new(&ContextConfig {
            application_name: c"render-headless",
            validation: cfg!(debug_assertions),
        })
    }
    .context("setting up vulkan")?;
    let mut scene = common::Scene::new(
        &mut context,
        extent,
        settings.clear_color,
        bytemuck::cast_slice(&common::TRIANGLE),
        &common::TRIANGLE_INDICES,
    )
    .context("building the scene")?;
    scene.render(&mut context).context("rendering")?;

    let (device, queue, pool) = context.split();
    let capture = unsafe { device.capture(pool, queue, &mut scene.color) }.context("capturing")?;
    let written = capture
        .pixels()
        .context("render target has no known channel order")
        .and_then(|pixels| {
            let ppm = settings.output.with_extension("ppm");
            write_ppm(&ppm, &pixels).with_context(|| format!("writing {}", ppm.display()))?;
            log::info!("wrote {}", ppm.display());
            if settings.output.extension().is_some_and(|ext| ext == "png") {
                write_png(&settings.output, &pixels)
                    .with_context(|| format!("writing {}", settings.output.display()))?;
                log::info!("wrote {}", settings.output.display());
            }
            Ok(())
        });
    unsafe { capture.release(&device) };
    scene.destroy(&context);
    unsafe { context.destroy() };
    written
}

fn main() {
    env_logger::init();
    let settings = match RenderSettings::from_args(std::env::args().skip(1)) {
        Ok(settings) => settings,
        Err(err) => exit_fatal(&FatalErrorPolicy { silent: false }, err),
    };
    log::debug!("{settings:?}");
    let policy = FatalErrorPolicy {
        silent: settings.silent,
    };
    if let Err(err) = run(&settings) {
        exit_fatal(&policy, err);
    }
}
