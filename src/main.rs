use clap::{ArgAction, Parser, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use unifrac::distances::{Metric, compute_from_index, compute_row_from_index};
use unifrac::io::{read_table_tsv, write_matrix_tsv, write_row_tsv};
use unifrac::tree::{BranchLengthPolicy, TreeIndex};
use unifrac::AlignmentPolicy;

/// Compute pairwise UniFrac distances from an abundance table and a rooted
/// tree and write a labeled distance matrix (TSV) keyed by sample ids.
#[derive(Parser, Debug)]
#[command(name = "unifrac", version, about = "Pairwise UniFrac distance matrix for a feature table and tree")]
struct Args {
    /// Path to the sample-by-feature abundance table (TSV)
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Path to the rooted phylogeny (Newick)
    #[arg(short = 't', long = "tree")]
    tree: PathBuf,

    /// Output path for the TSV distance matrix (gzip-compressed if it ends in .gz)
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// UniFrac variant to compute
    #[arg(short = 'm', long = "metric", value_enum, default_value_t = MetricArg::Unweighted)]
    metric: MetricArg,

    /// Abundance exponent for the generalized metric
    #[arg(long = "alpha", default_value_t = 1.0)]
    alpha: f64,

    /// How to treat features present in only the table or only the tree
    #[arg(long = "policy", value_enum, default_value_t = PolicyArg::Intersect)]
    policy: PolicyArg,

    /// Clamp negative branch lengths to zero instead of failing
    #[arg(long = "clamp-negative-lengths", default_value_t = false)]
    clamp_negative_lengths: bool,

    /// Compute a single one-vs-all row for this sample id instead of the full matrix
    #[arg(long = "reference")]
    reference: Option<String>,

    /// Quiet mode: only errors are printed
    #[arg(short = 'q', long = "quiet", default_value_t = false, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbosity; repeat for more detail
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MetricArg {
    #[value(name = "unweighted")]
    Unweighted,
    #[value(name = "weighted_normalized")]
    WeightedNormalized,
    #[value(name = "weighted_unnormalized")]
    WeightedUnnormalized,
    #[value(name = "generalized")]
    Generalized,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PolicyArg {
    Strict,
    Intersect,
}

fn main() {
    let args = Args::parse();
    init_logger(args.quiet, args.verbose);

    let metric = match args.metric {
        MetricArg::Unweighted => Metric::Unweighted,
        MetricArg::WeightedNormalized => Metric::WeightedNormalized,
        MetricArg::WeightedUnnormalized => Metric::WeightedUnnormalized,
        MetricArg::Generalized => Metric::Generalized { alpha: args.alpha },
    };
    let policy = match args.policy {
        PolicyArg::Strict => AlignmentPolicy::Strict,
        PolicyArg::Intersect => AlignmentPolicy::Intersect,
    };
    let branch_lengths = if args.clamp_negative_lengths {
        BranchLengthPolicy::ClampToZero
    } else {
        BranchLengthPolicy::Reject
    };

    // Read inputs
    let t0 = Instant::now();
    let tree = match phylotree::tree::Tree::from_file(&args.tree) {
        Ok(t) => t,
        Err(e) => {
            log::error!("failed to read tree {:?}: {e}", args.tree);
            std::process::exit(2);
        }
    };
    let table = match read_table_tsv(&args.input) {
        Ok(t) => t,
        Err(e) => {
            log::error!("failed to read table {:?}: {e}", args.input);
            std::process::exit(2);
        }
    };
    log::info!(
        "read {} samples x {} features and a tree in {:.3}s",
        table.n_samples(),
        table.n_features(),
        t0.elapsed().as_secs_f64()
    );

    // Index the tree once; all samples and pairs share it read-only.
    let t1 = Instant::now();
    let index = match TreeIndex::from_tree_with(&tree, branch_lengths) {
        Ok(index) => index,
        Err(e) => {
            log::error!("failed to index tree: {e}");
            std::process::exit(3);
        }
    };
    log::info!(
        "indexed {} nodes ({} leaves) in {:.3}s",
        index.node_count(),
        index.leaf_count(),
        t1.elapsed().as_secs_f64()
    );

    let t2 = Instant::now();
    match &args.reference {
        Some(reference) => {
            let row = match compute_row_from_index(&index, &table, reference, metric, policy) {
                Ok(row) => row,
                Err(e) => {
                    log::error!("{metric} computation failed: {e}");
                    std::process::exit(3);
                }
            };
            log::info!(
                "computed {metric} distances for '{reference}' vs {} samples in {:.3}s",
                table.n_samples() - 1,
                t2.elapsed().as_secs_f64()
            );

            if let Err(e) = write_row_tsv(&args.output, table.sample_ids(), reference, &row) {
                log::error!("failed to write output {:?}: {e}", args.output);
                std::process::exit(4);
            }
        }
        None => {
            let n = table.n_samples();
            log::info!(
                "computing {metric} distances for {} sample pairs",
                n * n.saturating_sub(1) / 2
            );
            let matrix = match compute_from_index(&index, &table, metric, policy) {
                Ok(matrix) => matrix,
                Err(e) => {
                    log::error!("{metric} computation failed: {e}");
                    std::process::exit(3);
                }
            };
            log::info!("computed {metric} distances in {:.3}s", t2.elapsed().as_secs_f64());

            if let Err(e) = write_matrix_tsv(&args.output, &matrix) {
                log::error!("failed to write output {:?}: {e}", args.output);
                std::process::exit(4);
            }
        }
    }

    log::info!("wrote {:?}", args.output);
}

fn init_logger(quiet: bool, verbose: u8) {
    let level = if quiet {
        log::LevelFilter::Error
    } else {
        match verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    if let Err(e) = env_logger::Builder::new()
        .filter_level(level)
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            let level = record.level().as_str().to_lowercase();
            writeln!(buf, "[unifrac {level:>5}] {}", record.args())
        })
        .try_init()
    {
        eprintln!("failed to setup logger: {e}");
    }
}
