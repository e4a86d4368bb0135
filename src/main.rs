use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use pdfveil::{
    secure_fs, DecryptOptions, EncryptOptions, Error, KdfParams, MetadataMode,
};

#[derive(Parser)]
#[command(
    name = "pdfveil",
    version,
    about = "pdfveil: encrypt and decrypt PDF files with AES-256-GCM.",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt one or more PDF files into .veil containers
    #[command(visible_alias = "enc")]
    Encrypt {
        /// Input PDF files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Password; repeat once per file, or give it once for all files
        #[arg(short, long, action = ArgAction::Append, env = "PDFVEIL_PASSWORD")]
        password: Vec<String>,

        /// Output path (single input only; default: <input>.veil)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite existing output files
        #[arg(short, long, default_value_t = false)]
        force: bool,

        /// Delete each source PDF after it was encrypted
        #[arg(long, default_value_t = false)]
        remove: bool,

        /// Overwrite passes before --remove unlinks the source (0 = plain delete)
        #[arg(long, default_value_t = 0)]
        shred_passes: usize,

        /// Store metadata in the clear (still tamper-evident via HMAC)
        #[arg(long, default_value_t = false)]
        no_encrypt_metadata: bool,

        /// PBKDF2 iterations (must match at decrypt time)
        #[arg(long, env = "PDFVEIL_KDF_ITERATIONS", default_value_t = KdfParams::DEFAULT_ITERATIONS)]
        kdf_iterations: u32,

        /// Do not check password strength
        #[arg(long, default_value_t = false)]
        skip_strength_check: bool,
    },

    /// Decrypt one or more .veil containers back into PDF files
    #[command(visible_alias = "dec")]
    Decrypt {
        /// Input .veil files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Password; repeat once per file, or give it once for all files
        #[arg(short, long, action = ArgAction::Append, env = "PDFVEIL_PASSWORD")]
        password: Vec<String>,

        /// Output path (single input only; default: strip .veil)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite existing output files
        #[arg(short, long, default_value_t = false)]
        force: bool,

        /// Delete each .veil container after it was decrypted
        #[arg(long, default_value_t = false)]
        remove: bool,

        /// PBKDF2 iterations used when the container was created
        #[arg(long, env = "PDFVEIL_KDF_ITERATIONS", default_value_t = KdfParams::DEFAULT_ITERATIONS)]
        kdf_iterations: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PDFVEIL_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Encrypt {
            files,
            password,
            output,
            force,
            remove,
            shred_passes,
            no_encrypt_metadata,
            kdf_iterations,
            skip_strength_check,
        } => {
            check_output_flag(&files, output.as_deref())?;
            let passwords = get_passwords(password, &files)?;
            let opts = EncryptOptions {
                force_overwrite: force,
                output_path: output,
                metadata_mode: if no_encrypt_metadata {
                    MetadataMode::PlaintextWithMac
                } else {
                    MetadataMode::Encrypted
                },
                kdf: KdfParams {
                    iterations: kdf_iterations,
                },
                skip_strength_check,
                ..Default::default()
            };
            run_batch(&files, &passwords, |file, pw| {
                cmd_encrypt(file, pw, &opts, remove.then_some(shred_passes))
            })
        }

        Commands::Decrypt {
            files,
            password,
            output,
            force,
            remove,
            kdf_iterations,
        } => {
            check_output_flag(&files, output.as_deref())?;
            let passwords = get_passwords(password, &files)?;
            let opts = DecryptOptions {
                force_overwrite: force,
                output_path: output,
                kdf: KdfParams {
                    iterations: kdf_iterations,
                },
                ..Default::default()
            };
            run_batch(&files, &passwords, |file, pw| cmd_decrypt(file, pw, &opts, remove))
        }
    }
}

fn check_output_flag(files: &[PathBuf], output: Option<&Path>) -> Result<()> {
    if output.is_some() && files.len() > 1 {
        bail!("--output can only be used with a single input file.");
    }
    Ok(())
}

/// Process files one by one; a failure is reported and the batch goes on.
fn run_batch<F>(files: &[PathBuf], passwords: &[Zeroizing<String>], mut op: F) -> Result<()>
where
    F: FnMut(&Path, &str) -> Result<()>,
{
    let mut failed = 0usize;
    for (file, password) in files.iter().zip(passwords) {
        if let Err(e) = op(file, password.as_str()) {
            eprintln!("[!] {}: {e:#}", file.display());
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} file(s) failed", files.len());
    }
    Ok(())
}

/// One password for all files, one per file, or prompt.
fn get_passwords(given: Vec<String>, files: &[PathBuf]) -> Result<Vec<Zeroizing<String>>> {
    let given: Vec<Zeroizing<String>> = given.into_iter().map(Zeroizing::new).collect();
    match given.len() {
        0 => {
            if atty::is(atty::Stream::Stdin) {
                files
                    .iter()
                    .map(|f| {
                        let p = rpassword::prompt_password(format!("Password for {}: ", f.display()))?;
                        if p.is_empty() {
                            bail!("A password is required.");
                        }
                        Ok(Zeroizing::new(p))
                    })
                    .collect()
            } else {
                // Not a terminal: read a single password line from stdin.
                let mut line = Zeroizing::new(String::new());
                std::io::stdin().lock().read_line(&mut line)?;
                let p = Zeroizing::new(line.trim_end_matches(['\r', '\n']).to_string());
                if p.is_empty() {
                    bail!("A password is required.");
                }
                Ok(vec![p; files.len()])
            }
        }
        1 => Ok(vec![given[0].clone(); files.len()]),
        n if n == files.len() => Ok(given),
        n => bail!(
            "Number of passwords ({n}) does not match number of files ({}).",
            files.len()
        ),
    }
}

fn confirm_weak(missing: &str) -> Result<bool> {
    if !atty::is(atty::Stream::Stdin) {
        return Ok(false);
    }
    eprint!("Password is weak (missing: {missing}). Continue anyway? [y/N] ");
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "YES"))
}

fn cmd_encrypt(
    file: &Path,
    password: &str,
    opts: &EncryptOptions,
    remove_passes: Option<usize>,
) -> Result<()> {
    let out = match pdfveil::encrypt(file, password, opts) {
        Err(Error::WeakPassword {
            missing,
            confirmable: true,
        }) => {
            if !confirm_weak(&missing)? {
                bail!("weak password (missing: {missing}); use --skip-strength-check to override");
            }
            let retry = EncryptOptions {
                skip_strength_check: true,
                ..opts.clone()
            };
            pdfveil::encrypt(file, password, &retry)
        }
        other => other,
    }
    .with_context(|| format!("encrypt {}", file.display()))?;

    println!(
        "OK: encrypted {} (metadata {})",
        file.display(),
        opts.metadata_mode.as_str()
    );
    println!("Wrote: {}", out.display());

    if let Some(passes) = remove_passes {
        secure_fs::remove_source(file, passes)
            .with_context(|| format!("remove source {}", file.display()))?;
        println!("Removed: {}", file.display());
    }
    Ok(())
}

fn cmd_decrypt(file: &Path, password: &str, opts: &DecryptOptions, remove: bool) -> Result<()> {
    let out = pdfveil::decrypt(file, password, opts)
        .with_context(|| format!("decrypt {}", file.display()))?;

    println!("OK: decrypted {}", file.display());
    println!("Wrote: {}", out.display());

    if remove {
        secure_fs::remove_source(file, 0)
            .with_context(|| format!("remove container {}", file.display()))?;
        println!("Removed: {}", file.display());
    }
    Ok(())
}
