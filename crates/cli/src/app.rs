use std::{
    cell::RefCell,
    io::{self, Write},
    time::Instant,
};

use anyhow::{anyhow, ensure, Context, Result};
use candle_nn::VarBuilder;
use image::DynamicImage;
use internvl_config::AppConfig;
use internvl_core::{
    load_model_config, prompt, runtime, streaming::StreamTracker, DecodeParameters,
    GenerateOptions, ImageProcessor, ImageProcessorConfig, InternVLModel,
};
use tokenizers::Tokenizer;
use tracing::info;

use crate::{args::Args, prompt::load_prompt, resources};

pub fn run(args: Args) -> Result<()> {
    let user_prompt = load_prompt(&args)?;

    let (mut config, config_path) = AppConfig::load_or_init(args.config.as_deref())?;
    config += &args;
    info!("using configuration {}", config_path.display());

    let slots = user_prompt.matches(prompt::IMAGE_PLACEHOLDER).count();
    ensure!(
        slots == args.images.len(),
        "prompt includes {slots} {} markers but {} image paths were provided",
        prompt::IMAGE_PLACEHOLDER,
        args.images.len()
    );

    let repo = config.model.repo.clone();
    let model_config_path =
        resources::ensure_file(config.model.config.as_deref(), &repo, "config.json")?;
    let tokenizer_path =
        resources::ensure_file(config.model.tokenizer.as_deref(), &repo, "tokenizer.json")?;
    let weight_files = resources::ensure_weight_files(config.model.weights.as_deref(), &repo)?;

    let device = runtime::select_device(config.inference.device)?;
    let dtype = runtime::resolve_dtype(&device, config.inference.precision);
    let model_cfg = load_model_config(&model_config_path)?;

    info!(
        "loading model (device={device:?}, dtype={dtype:?}, shards={})",
        weight_files.len()
    );
    let load_start = Instant::now();
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weight_files, dtype, &device) }
        .context("failed to mmap model weights")?;
    let mut model = InternVLModel::load(model_cfg, vb)?;
    info!("model ready in {:.2?}", load_start.elapsed());

    let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|err| {
        anyhow!(
            "failed to load tokenizer from {}: {err}",
            tokenizer_path.display()
        )
    })?;

    let images = args
        .images
        .iter()
        .map(|path| {
            image::open(path).with_context(|| format!("failed to open image {}", path.display()))
        })
        .collect::<Result<Vec<DynamicImage>>>()?;

    let processor = ImageProcessor::new(ImageProcessorConfig {
        min_patches: config.inference.min_patches,
        max_patches: config.inference.max_patches,
        use_thumbnail: config.inference.use_thumbnail,
        ..ImageProcessorConfig::default()
    });
    let (pixel_values, tiles_per_image) = if images.is_empty() {
        (None, Vec::new())
    } else {
        let processed = processor.preprocess(&images, model.device(), model.dtype())?;
        info!(
            "prepared {} tiles across {} image(s)",
            processed.tiles_per_image.iter().sum::<usize>(),
            images.len()
        );
        (Some(processed.pixel_values), processed.tiles_per_image)
    };

    let chat_prompt = prompt::render_chat_prompt(&args.system, &user_prompt);
    let input_ids = prompt::build_input_ids(
        &tokenizer,
        &chat_prompt,
        &tiles_per_image,
        model.config(),
        model.device(),
    )?;

    let tracker = RefCell::new(StreamTracker::new());
    let stream = |_generated: usize, tokens: &[i64]| {
        let ids: Vec<u32> = tokens.iter().map(|&t| t as u32).collect();
        if let Ok(text) = tokenizer.decode(&ids, true) {
            let delta = tracker.borrow_mut().advance(&text, false);
            if !delta.is_empty() {
                print!("{delta}");
                let _ = io::stdout().flush();
            }
        }
    };

    let mut options = GenerateOptions::new(config.inference.max_new_tokens);
    options.eos_token_id = Some(model.config().text_config.eos_token_id);
    options.decode = DecodeParameters {
        do_sample: config.inference.do_sample,
        temperature: config.inference.temperature,
        top_p: Some(config.inference.top_p),
        top_k: config.inference.top_k,
        repetition_penalty: config.inference.repetition_penalty,
        seed: config.inference.seed,
    };
    if !args.quiet {
        options.progress_callback = Some(&stream);
    }

    let generate_start = Instant::now();
    let generated = model.generate(&input_ids, pixel_values.as_ref(), options)?;
    let elapsed = generate_start.elapsed();

    let token_ids: Vec<u32> = generated
        .flatten_all()?
        .to_vec1::<i64>()?
        .iter()
        .map(|&t| t as u32)
        .collect();
    let text = tokenizer
        .decode(&token_ids, true)
        .map_err(|err| anyhow!("failed to decode generated tokens: {err}"))?;

    if args.quiet {
        println!("{text}");
    } else {
        let final_delta = tracker.borrow_mut().advance(&text, true);
        print!("{final_delta}");
        println!();
    }
    info!(
        "generated {} tokens in {:.2?} ({:.2} tok/s)",
        token_ids.len(),
        elapsed,
        token_ids.len() as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}
