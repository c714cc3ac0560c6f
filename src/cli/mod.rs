//! Command-line interface for convoy.
//!
//! Provides commands for recording artifact production, inspecting
//! readiness, driving branch lifecycles, and replaying the transition
//! log. Every command discovers the workflow configuration by walking
//! up from the current directory.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{fs_store::hash_content, ArtifactStore, CommandVerifier, FsArtifactStore, Verifier};
use crate::config::WorkflowConfig;
use crate::core::Engine;
use crate::domain::{Transition, Verdict, WorkflowError};

/// convoy - Artifact-dependency workflow orchestrator
#[derive(Parser, Debug)]
#[command(name = "convoy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the full workflow status
    Status,

    /// List stages whose prerequisites are all satisfied
    Eligible,

    /// Explain why each pending stage cannot run yet
    Blocked,

    /// Record an artifact as produced
    Produce {
        /// Artifact id
        artifact: String,

        /// File to hash as the artifact's content (defaults to the
        /// configured store path when present)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Mark an artifact stale, cascading to its consumers
    Stale {
        /// Artifact id
        artifact: String,
    },

    /// Destroy an artifact's recorded content, cascading forward
    Reset {
        /// Artifact id
        artifact: String,
    },

    /// Manage open questions on artifacts
    Question {
        #[command(subcommand)]
        command: QuestionCommands,
    },

    /// Record a filled-in field on an artifact
    Field {
        /// Artifact id
        artifact: String,

        /// Field key
        key: String,

        /// Field value
        value: String,
    },

    /// Drive a branch through its lifecycle
    Branch {
        #[command(subcommand)]
        command: BranchCommands,
    },

    /// Submit or run verification for a branch
    Verify {
        /// Branch id
        branch: String,

        /// Record a passing verdict without running the verifier
        #[arg(long, conflicts_with = "fail")]
        pass: bool,

        /// Record a failing verdict without running the verifier
        #[arg(long)]
        fail: bool,

        /// Diagnostic to attach to a failing verdict
        #[arg(short, long)]
        diagnostic: Option<String>,
    },

    /// Show join barrier status
    Join {
        /// Join id (all joins if omitted)
        name: Option<String>,
    },

    /// Compare recorded hashes against the artifact store and
    /// invalidate anything that changed on disk
    Sync,

    /// Show recent transitions from the log
    Log {
        /// Maximum number of transitions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only transitions concerning this artifact
        #[arg(short, long, conflicts_with = "branch")]
        artifact: Option<String>,

        /// Only transitions concerning this branch
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum QuestionCommands {
    /// Raise an open question against an artifact
    Raise {
        /// Artifact id
        artifact: String,

        /// Question text
        text: String,
    },

    /// Resolve an open question with an explicit confirmation
    Resolve {
        /// Artifact id
        artifact: String,

        /// Question id (e.g. "q1")
        question: String,

        /// Resolution text
        resolution: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum BranchCommands {
    /// Begin work on a ready branch
    Start {
        /// Branch id
        branch: String,
    },

    /// Report the branch's declared outputs as produced, hashing
    /// their content from the artifact store
    Report {
        /// Branch id
        branch: String,
    },

    /// Resubmit a branch after rework
    Resubmit {
        /// Branch id
        branch: String,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = WorkflowConfig::discover()?;
        let mut engine = Engine::open(&config).await?;

        match self.command {
            Commands::Status => {
                println!("{}", engine.status());
                Ok(())
            }
            Commands::Eligible => {
                let eligible = engine.eligible();
                if eligible.is_empty() {
                    println!("No stages are eligible.");
                } else {
                    for stage in eligible {
                        println!("{}", stage);
                    }
                }
                Ok(())
            }
            Commands::Blocked => {
                let blocked = engine.blocked();
                if blocked.is_empty() {
                    println!("No stages are blocked.");
                } else {
                    for (stage, reasons) in blocked {
                        println!("{}:", stage);
                        for reason in reasons {
                            println!("  {}", reason);
                        }
                    }
                }
                Ok(())
            }
            Commands::Produce { artifact, file } => {
                produce(&mut engine, &config, &artifact, file).await
            }
            Commands::Stale { artifact } => {
                engine.invalidate(&artifact).await?;
                println!("Marked '{}' stale.", artifact);
                Ok(())
            }
            Commands::Reset { artifact } => {
                engine.reset(&artifact).await?;
                println!("Reset '{}'.", artifact);
                Ok(())
            }
            Commands::Question { command } => match command {
                QuestionCommands::Raise { artifact, text } => {
                    let id = engine.raise_question(&artifact, &text).await?;
                    println!("Raised {} on '{}'.", id, artifact);
                    Ok(())
                }
                QuestionCommands::Resolve {
                    artifact,
                    question,
                    resolution,
                } => {
                    engine
                        .resolve_question(&artifact, &question, &resolution)
                        .await?;
                    println!("Resolved {} on '{}'.", question, artifact);
                    Ok(())
                }
            },
            Commands::Field {
                artifact,
                key,
                value,
            } => {
                engine.record_field(&artifact, &key, &value).await?;
                println!("Recorded {}={} on '{}'.", key, value, artifact);
                Ok(())
            }
            Commands::Branch { command } => match command {
                BranchCommands::Start { branch } => {
                    engine.start_branch(&branch).await?;
                    println!("Branch '{}' started.", branch);
                    Ok(())
                }
                BranchCommands::Report { branch } => {
                    report_branch(&mut engine, &config, &branch).await
                }
                BranchCommands::Resubmit { branch } => {
                    engine.resubmit_branch(&branch).await?;
                    let status = engine.coordinator().branch(&branch)?.status;
                    println!("Branch '{}' resubmitted ({}).", branch, status);
                    Ok(())
                }
            },
            Commands::Verify {
                branch,
                pass,
                fail,
                diagnostic,
            } => verify_branch(&mut engine, &config, &branch, pass, fail, diagnostic).await,
            Commands::Join { name } => {
                show_joins(&engine, name)
            }
            Commands::Sync => {
                let store = FsArtifactStore::new(config.artifact_paths());
                let changed = engine.sync(&store).await?;
                if changed.is_empty() {
                    println!("All recorded hashes match the store.");
                } else {
                    for id in changed {
                        println!("Invalidated '{}' (content changed).", id);
                    }
                }
                Ok(())
            }
            Commands::Log {
                limit,
                artifact,
                branch,
            } => {
                let mut transitions = if let Some(artifact) = artifact {
                    engine.transitions_for_artifact(&artifact).await?
                } else if let Some(branch) = branch {
                    engine.transitions_for_branch(&branch).await?
                } else {
                    engine.recent_transitions(limit).await?
                };
                let skip = transitions.len().saturating_sub(limit);
                for transition in transitions.split_off(skip) {
                    println!("{}", describe(&transition));
                }
                Ok(())
            }
            Commands::Config => {
                println!("# root: {}", config.root.display());
                println!("# state: {}", config.state_dir().display());
                print!("{}", serde_yaml::to_string(&config)?);
                Ok(())
            }
        }
    }
}

async fn produce(
    engine: &mut Engine,
    config: &WorkflowConfig,
    artifact: &str,
    file: Option<PathBuf>,
) -> Result<()> {
    let hash = match file {
        Some(path) => {
            let content = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Some(hash_content(&content))
        }
        None => {
            let store = FsArtifactStore::new(config.artifact_paths());
            store.content_hash(artifact).await?
        }
    };

    engine.produce(artifact, hash).await?;
    println!("Produced '{}'.", artifact);
    Ok(())
}

async fn report_branch(engine: &mut Engine, config: &WorkflowConfig, branch: &str) -> Result<()> {
    let outputs = engine.coordinator().branch(branch)?.outputs.clone();
    let store = FsArtifactStore::new(config.artifact_paths());

    let mut hashes = BTreeMap::new();
    for output in &outputs {
        let hash = store
            .content_hash(output)
            .await?
            .with_context(|| match store.path_for(output) {
                Some(path) => format!("Output '{}' has no content at {}", output, path.display()),
                None => format!("Output '{}' has no configured store path", output),
            })?;
        hashes.insert(output.clone(), hash);
    }

    engine.report_branch(branch, &hashes).await?;
    println!(
        "Branch '{}' reported {} output(s); awaiting verification.",
        branch,
        outputs.len()
    );
    Ok(())
}

async fn verify_branch(
    engine: &mut Engine,
    config: &WorkflowConfig,
    branch: &str,
    pass: bool,
    fail: bool,
    diagnostic: Option<String>,
) -> Result<()> {
    let verdict = if pass {
        Verdict::pass()
    } else if fail {
        Verdict::fail(diagnostic.unwrap_or_else(|| "verification rejected".to_string()))
    } else {
        let Some(spec) = config.verifier_for(branch) else {
            bail!(
                "No verifier configured for branch '{}'; use --pass or --fail",
                branch
            );
        };
        let verifier =
            CommandVerifier::new(&spec.command, Duration::from_secs(spec.timeout_seconds));
        verifier.verify(branch).await?
    };

    let passed = verdict.passed;
    let status = engine.verify_branch(branch, &verdict).await?;
    println!("Branch '{}' is now {}.", branch, status);

    if !passed {
        let diagnostic = engine
            .coordinator()
            .branch(branch)?
            .diagnostic
            .clone()
            .unwrap_or_default();
        return Err(WorkflowError::VerificationFailure {
            branch: branch.to_string(),
            diagnostic,
        }
        .into());
    }
    Ok(())
}

fn show_joins(engine: &Engine, name: Option<String>) -> Result<()> {
    let names: Vec<String> = match name {
        Some(n) => vec![n],
        None => engine.coordinator().joins().map(|j| j.id.clone()).collect(),
    };
    if names.is_empty() {
        println!("No joins configured.");
        return Ok(());
    }

    for name in names {
        let status = engine.join(&name)?;
        if status.satisfied {
            println!("{}: satisfied", status.id);
        } else {
            println!("{}: waiting", status.id);
            for reason in &status.waiting_on {
                println!("  {}", reason);
            }
        }
    }
    Ok(())
}

/// One-line rendering of a logged transition
fn describe(t: &Transition) -> String {
    let subject = t
        .artifact_id
        .as_deref()
        .or(t.branch_id.as_deref())
        .or(t.join_id.as_deref())
        .or(t.stage_id.as_deref())
        .unwrap_or("-");
    format!(
        "{}  {:<20}  {:<18}  {}",
        t.timestamp.format("%Y-%m-%d %H:%M:%S"),
        format!("{:?}", t.kind),
        subject,
        t.cause
    )
}
