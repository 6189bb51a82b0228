use anyhow::Context;
use burn_vqa::backend::{MainAutoBackend, MainDevice};
use burn_vqa::data::{
    AnswerDictionary, EmbeddingTable, ExampleStore, ImageLoader, Prefetcher, Vocabulary,
    serialize_questions, write_examples,
};
use burn_vqa::model::VqaModelConfig;
use burn_vqa::pretrained::WeightImporter;
use burn_vqa::training::{
    MODEL_CONFIG_NAME, RunDirectory, TRAINING_CONFIG_NAME, Trainer, TrainingConfig, load_config,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const HELP: &str = "\
Soft-attention visual question answering

Trains an answer classifier on top of a frozen pretrained ResNet image encoder.

USAGE:
    vqa serialize --questions <PATH> --vocab <PATH> --out <DIR>
    vqa train [OPTIONS] --vocab <PATH> --embeddings <PATH> --examples <PATH>
              --answers <PATH> --checkpoint <PATH> --image-dir <DIR>

COMMANDS:
    serialize       Encode a questions file into `train_examples.jsonl` and `answers.json`
    train           Run the training loop

FLAGS:
    -h, --help      Show this help message and exit

SERIALIZE OPTIONS:
    --questions <PATH>      Questions JSON, `{ \"questions\": [{question, answer, image_filename}] }`
    --vocab <PATH>          Vocabulary, one word per line (line 0 is the padding slot)
    --out <DIR>             Output directory, created if missing

TRAIN OPTIONS:
    --vocab <PATH>          Vocabulary, one word per line
    --embeddings <PATH>     Word embeddings JSON, `{ word: [[f32; dim]] }`
    --examples <PATH>       Example store written by `serialize`
    --answers <PATH>        Answer dictionary written by `serialize`
    --checkpoint <PATH>     Pretrained ResNet weights (safetensors)
    --image-dir <DIR>       Directory the example image paths are relative to
    -l, --logs <DIR>        Root of the run directories [default: logs]
    -r, --resume <DIR>      Continue the run in this directory from its latest checkpoint,
                            with its saved configurations unless overridden below
    -c, --training-config <PATH>
                            Load the training configuration from this file
    -m, --model-config <PATH>
                            Load the model configuration from this file
";

#[derive(Debug)]
enum Command {
    Serialize {
        questions: PathBuf,
        vocab: PathBuf,
        out: PathBuf,
    },
    Train(TrainArgs),
}

#[derive(Debug)]
struct TrainArgs {
    vocab: PathBuf,
    embeddings: PathBuf,
    examples: PathBuf,
    answers: PathBuf,
    checkpoint: PathBuf,
    image_dir: PathBuf,
    logs: PathBuf,
    resume: Option<PathBuf>,
    training_config: Option<PathBuf>,
    model_config: Option<PathBuf>,
}

fn parse_path(s: &std::ffi::OsStr) -> Result<PathBuf, &'static str> {
    Ok(s.into())
}

fn parse_args() -> Result<Command, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        println!("{HELP}");
        std::process::exit(0);
    }

    let command = match pargs.subcommand()?.as_deref() {
        Some("serialize") => Command::Serialize {
            questions: pargs.value_from_os_str("--questions", parse_path)?,
            vocab: pargs.value_from_os_str("--vocab", parse_path)?,
            out: pargs.value_from_os_str("--out", parse_path)?,
        },
        Some("train") => Command::Train(TrainArgs {
            vocab: pargs.value_from_os_str("--vocab", parse_path)?,
            embeddings: pargs.value_from_os_str("--embeddings", parse_path)?,
            examples: pargs.value_from_os_str("--examples", parse_path)?,
            answers: pargs.value_from_os_str("--answers", parse_path)?,
            checkpoint: pargs.value_from_os_str("--checkpoint", parse_path)?,
            image_dir: pargs.value_from_os_str("--image-dir", parse_path)?,
            logs: pargs
                .opt_value_from_os_str(["-l", "--logs"], parse_path)?
                .unwrap_or_else(|| PathBuf::from("logs")),
            resume: pargs.opt_value_from_os_str(["-r", "--resume"], parse_path)?,
            training_config: pargs
                .opt_value_from_os_str(["-c", "--training-config"], parse_path)?,
            model_config: pargs.opt_value_from_os_str(["-m", "--model-config"], parse_path)?,
        }),
        _ => {
            eprintln!("{HELP}");
            std::process::exit(2);
        }
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        return Err(pico_args::Error::ArgumentParsingFailed {
            cause: format!("unused arguments: {remaining:?}"),
        });
    }
    Ok(command)
}

fn serialize(questions: PathBuf, vocab: PathBuf, out: PathBuf) -> anyhow::Result<()> {
    let vocab = Vocabulary::load(&vocab)?;
    let json = std::fs::read_to_string(&questions)
        .with_context(|| format!("reading questions from {questions:?}"))?;
    let (records, answers) = serialize_questions(&json, &vocab)?;

    std::fs::create_dir_all(&out).with_context(|| format!("creating {out:?}"))?;
    write_examples(out.join("train_examples.jsonl"), &records)?;
    answers.save(out.join("answers.json"))?;
    Ok(())
}

fn train(args: TrainArgs) -> anyhow::Result<()> {
    let vocab = Vocabulary::load(&args.vocab)?;
    let embeddings = EmbeddingTable::load(&args.embeddings, &vocab)?;
    let answers = AnswerDictionary::load(&args.answers)?;
    let store = ExampleStore::load(&args.examples)?;
    let weights = WeightImporter::default().load(&args.checkpoint)?;

    let run = match &args.resume {
        Some(dir) => RunDirectory::open(dir)?,
        None => RunDirectory::create(&args.logs)?,
    };
    let saved = |name: &str| {
        args.resume
            .as_ref()
            .map(|_| run.path().join(format!("{name}.json")))
            .filter(|path| path.exists())
    };

    let training_config: TrainingConfig =
        match args.training_config.clone().or_else(|| saved(TRAINING_CONFIG_NAME)) {
            Some(path) => load_config(path)?,
            None => TrainingConfig::new(),
        };
    let model_config: VqaModelConfig =
        match args.model_config.clone().or_else(|| saved(MODEL_CONFIG_NAME)) {
            Some(path) => load_config(path)?,
            None => VqaModelConfig::for_corpus(vocab.len(), answers.len()),
        };
    store.check_ids(model_config.text.vocab_size, model_config.classifier.n_answers)?;

    run.save_config(TRAINING_CONFIG_NAME, &training_config)?;
    run.save_config(MODEL_CONFIG_NAME, &model_config)?;

    let device = MainAutoBackend::main_device();
    let model = model_config
        .init::<MainAutoBackend>(&weights, Some(&embeddings), &device)
        .context("building the model")?;

    let mut trainer = Trainer::new(
        training_config.clone(),
        model,
        model_config.image_side,
        device,
    )?;
    if args.resume.is_some() {
        trainer.resume(&run)?;
    }

    let loader = ImageLoader::new(&args.image_dir, model_config.image_side)
        .with_bounds(model_config.text.vocab_size, model_config.classifier.n_answers);
    let mut prefetcher =
        Prefetcher::spawn(&training_config.prefetch, Arc::new(store), Arc::new(loader));
    trainer.run(&mut prefetcher, &run, &vocab, &answers)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("burn_vqa=info,vqa=info")),
        )
        .init();

    match parse_args()? {
        Command::Serialize {
            questions,
            vocab,
            out,
        } => serialize(questions, vocab, out),
        Command::Train(args) => train(args),
    }
}
