use clap::{Args, Parser, Subcommand, ValueEnum};
use perf_bench::bench_config::{BenchRunConfig, StagingConfig};
use perf_bench::runners::Reducer;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Also write logs to a daily rolling file in this directory
    #[arg(long = "log-dir", value_name = "DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the benchmark and publish the summary
    #[command(about = "Run the benchmark and publish the summary")]
    Run {
        #[command(flatten)]
        args: BenchArgs,
    },

    /// Expand the request and list the runs without executing them
    #[command(about = "List the runs a benchmark would execute")]
    Plan {
        #[command(flatten)]
        args: BenchArgs,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Request and job options. Anything given here overrides the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct BenchArgs {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "YAML or JSON benchmark config",
        long_help = "YAML or JSON file with the request, job options and pipeline stage commands. Command-line flags take precedence."
    )]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "TYPE", help = "Which models to run: default or all")]
    pub model_type: Option<String>,

    #[arg(
        long,
        value_name = "SIZE",
        help = "Which datasets to run: small, medium, large or all"
    )]
    pub data_size: Option<String>,

    #[arg(
        long,
        value_name = "N",
        allow_negative_numbers = true,
        help = "Repeats per model and dataset (0 uses the catalog default)"
    )]
    pub num_repeat: Option<i64>,

    #[arg(
        long,
        value_name = "N",
        allow_negative_numbers = true,
        help = "Training epochs (0 uses the catalog default)"
    )]
    pub num_epoch: Option<i64>,

    #[arg(long, value_name = "STAGE", help = "Last stage to run: train, export or optimize")]
    pub eval_upto: Option<String>,

    #[arg(long, value_name = "DIR", help = "Root of the benchmark datasets")]
    pub data_root: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Task catalog (defaults to catalog.yaml under the data root)"
    )]
    pub catalog: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Where to publish the summary CSV")]
    pub summary_csv: Option<PathBuf>,

    #[arg(long, value_name = "REDUCER", help = "mean, median, min or max")]
    pub reducer: Option<Reducer>,

    #[arg(long, value_name = "N", help = "Runs executed concurrently")]
    pub max_parallel: Option<usize>,

    #[arg(long, value_name = "SECS", help = "Wall-clock limit for a single run")]
    pub run_timeout: Option<u64>,

    #[arg(
        long,
        value_name = "SECS",
        help = "Wall-clock limit for the whole job; pending runs are skipped"
    )]
    pub timeout: Option<u64>,

    #[arg(long, value_name = "DIR", help = "Root of the per-run work directories")]
    pub output_dir: Option<PathBuf>,

    #[arg(
        long,
        value_name = "DIR",
        help = "Copy the published summary here for artifact upload"
    )]
    pub stage_dir: Option<PathBuf>,

    #[arg(
        long,
        value_name = "NAME",
        requires = "stage_dir",
        help = "Name prefix of the staged artifact"
    )]
    pub artifact_prefix: Option<String>,

    #[arg(long, value_name = "FILE", help = "Env file passed to stage commands")]
    pub env_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

impl BenchArgs {
    /// Overlay the flags that were given onto a loaded config
    pub fn apply(&self, config: &mut BenchRunConfig) {
        if let Some(model_type) = &self.model_type {
            config.request.model_type = model_type.clone();
        }
        if let Some(data_size) = &self.data_size {
            config.request.data_size = data_size.clone();
        }
        if let Some(num_repeat) = self.num_repeat {
            config.request.num_repeat = num_repeat;
        }
        if let Some(num_epoch) = self.num_epoch {
            config.request.num_epoch = num_epoch;
        }
        if let Some(eval_upto) = &self.eval_upto {
            config.request.eval_upto = eval_upto.clone();
        }
        if let Some(data_root) = &self.data_root {
            config.data_root = Some(data_root.clone());
        }
        if let Some(catalog) = &self.catalog {
            config.catalog = Some(catalog.clone());
        }
        if let Some(summary_csv) = &self.summary_csv {
            config.summary_csv = Some(summary_csv.clone());
        }
        if let Some(reducer) = self.reducer {
            config.reducer = reducer;
        }
        if let Some(max_parallel) = self.max_parallel {
            config.max_parallel = max_parallel;
        }
        if let Some(secs) = self.run_timeout {
            config.run_timeout_secs = Some(secs);
        }
        if let Some(secs) = self.timeout {
            config.job_timeout_secs = Some(secs);
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        if let Some(dir) = &self.stage_dir {
            match config.staging.as_mut() {
                Some(staging) => staging.dir = dir.clone(),
                None => config.staging = Some(StagingConfig::new(dir)),
            }
        }
        if let (Some(prefix), Some(staging)) = (&self.artifact_prefix, config.staging.as_mut()) {
            staging.prefix = prefix.clone();
        }
        if let Some(env_file) = &self.env_file {
            config.env_file = Some(env_file.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("perf-bench").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_run_flags_override_config() {
        let cli = parse(&[
            "run",
            "--model-type",
            "all",
            "--data-size",
            "medium",
            "--num-repeat",
            "2",
            "--eval-upto",
            "export",
            "--reducer",
            "median",
            "--max-parallel",
            "3",
            "--timeout",
            "3600",
            "--stage-dir",
            "upload",
            "--artifact-prefix",
            "nightly",
        ]);
        let Command::Run { args } = cli.command else {
            panic!("expected run");
        };

        let mut config = BenchRunConfig::default();
        config.request.num_epoch = 5;
        args.apply(&mut config);

        assert_eq!(config.request.model_type, "all");
        assert_eq!(config.request.data_size, "medium");
        assert_eq!(config.request.num_repeat, 2);
        assert_eq!(config.request.num_epoch, 5);
        assert_eq!(config.request.eval_upto, "export");
        assert_eq!(config.reducer, Reducer::Median);
        assert_eq!(config.max_parallel, 3);
        assert_eq!(config.job_timeout_secs, Some(3600));
        let staging = config.staging.unwrap();
        assert_eq!(staging.dir, PathBuf::from("upload"));
        assert_eq!(staging.prefix, "nightly");
        assert_eq!(args.format, OutputFormat::Text);
    }

    #[test]
    fn test_negative_repeat_reaches_validation() {
        let cli = parse(&["plan", "--num-repeat", "-1"]);
        let Command::Plan { args } = cli.command else {
            panic!("expected plan");
        };
        assert_eq!(args.num_repeat, Some(-1));
    }

    #[test_case(&["run", "--reducer", "mode"] ; "unknown reducer")]
    #[test_case(&["run", "--artifact-prefix", "x"] ; "prefix without stage dir")]
    #[test_case(&["run", "--format", "xml"] ; "unknown format")]
    fn test_rejected_flags(args: &[&str]) {
        let result = Cli::try_parse_from(std::iter::once("perf-bench").chain(args.iter().copied()));
        assert!(result.is_err());
    }

    #[test]
    fn test_log_dir_is_global() {
        let cli = parse(&["plan", "--log-dir", "logs"]);
        assert_eq!(cli.log_dir, Some(PathBuf::from("logs")));
    }
}
