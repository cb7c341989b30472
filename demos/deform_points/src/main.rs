use argh::FromArgs;
use std::path::PathBuf;

use mlswarp::imgproc::draw::OverlayStyle;
use mlswarp::imgproc::parallel::ExecutionStrategy;
use mlswarp::imgproc::warp::{self, ControlPointSession, DeformParams, SingularPolicy};
use mlswarp::io::functional as F;

#[derive(FromArgs)]
/// Drag image content from source points to target points.
struct Args {
    /// path to the input image
    #[argh(option, short = 'i')]
    image_path: PathBuf,

    /// path to a JSON click list `{"clicks": [[x, y], ...]}`, alternating source and target
    #[argh(option, short = 'c')]
    clicks_path: PathBuf,

    /// path to write the deformed image (png)
    #[argh(option, short = 'o')]
    output_path: PathBuf,

    /// optional path to write the picks drawn on the input image (png)
    #[argh(option)]
    overlay_path: Option<PathBuf>,

    /// weight falloff exponent
    #[argh(option, default = "1.0")]
    alpha: f64,

    /// singularity guard added to the weight denominator
    #[argh(option, default = "1e-8")]
    eps: f64,

    /// abort when a pixel has a singular local basis instead of translating it
    #[argh(switch)]
    fail_on_singular: bool,

    /// number of worker threads, 0 uses the global pool
    #[argh(option, default = "0")]
    threads: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    // read the image and replay the clicks
    let image = F::read_image_any_rgb8(&args.image_path)?;
    log::info!("loaded {} from {:?}", image.size(), args.image_path);

    let mut session = ControlPointSession::new(image);
    for [x, y] in F::read_clicks_json(&args.clicks_path)? {
        session.pick(x, y);
    }
    if let Some(p) = session.pending_source() {
        log::warn!("ignoring source ({}, {}) without a target", p.x, p.y);
    }

    if let Some(overlay_path) = &args.overlay_path {
        F::write_image_png_rgb8(overlay_path, &session.overlay(&OverlayStyle::default()))?;
    }

    let params = DeformParams {
        alpha: args.alpha,
        eps: args.eps,
        singular_policy: if args.fail_on_singular {
            SingularPolicy::Fail
        } else {
            SingularPolicy::Translate
        },
    };
    let strategy = match args.threads {
        0 => ExecutionStrategy::ParallelRows,
        n => ExecutionStrategy::Fixed(n),
    };

    let pairs = session.completed_pairs();
    log::info!("deforming with {} pairs", pairs.len());
    let output = warp::deform_with_strategy(session.image(), &pairs, &params, strategy)?;

    F::write_image_png_rgb8(&args.output_path, &output)?;
    log::info!("wrote {:?}", args.output_path);

    Ok(())
}
