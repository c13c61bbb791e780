use std::path::{Path, PathBuf};

use anyhow::{format_err, Error};
use serde_json::{json, Value};

use proxmox_router::cli::*;
use proxmox_schema::api;

use preflight_buildcfg::{
    PREFLIGHT_CONFIG_FN, PREFLIGHT_PKG_RELEASE, PREFLIGHT_PKG_REPOID, PREFLIGHT_PKG_VERSION,
    TOOL_NAME,
};

use proxmox_backup_preflight::environment::detect_unprivileged_container;
use proxmox_backup_preflight::{security, Detector, ProbeContext, SecurityResult, SystemHost};

fn print_issues(result: &SecurityResult, output_format: &str) -> Result<(), Error> {
    if output_format == "text" {
        for issue in result.issues() {
            println!("{}: {}", issue.severity, issue.message);
        }
        println!(
            "{} error(s), {} warning(s)",
            result.errors(),
            result.warnings()
        );
    } else {
        format_and_print_result(&serde_json::to_value(result)?, output_format);
    }
    Ok(())
}

#[api(
    input: {
        properties: {
            config: {
                description: "Preflight configuration file (JSON).",
                type: String,
                optional: true,
            },
            "config-path": {
                description: "File whose permissions are checked, defaults to the configuration.",
                type: String,
                optional: true,
            },
            "exec-path": {
                description: "Executable to verify against its hash file. Defaults to this binary.",
                type: String,
                optional: true,
            },
            "output-format": {
                schema: OUTPUT_FORMAT,
                optional: true,
            },
        }
    }
)]
/// Detect the environment and run all security checks.
async fn check(
    config: Option<String>,
    config_path: Option<String>,
    exec_path: Option<String>,
    param: Value,
) -> Result<(), Error> {
    let output_format = get_output_format(&param);

    log::info!(
        "{} {}.{} ({})",
        TOOL_NAME,
        PREFLIGHT_PKG_VERSION,
        PREFLIGHT_PKG_RELEASE,
        PREFLIGHT_PKG_REPOID
    );

    let config_file = PathBuf::from(config.unwrap_or_else(|| PREFLIGHT_CONFIG_FN.to_string()));
    let security_config = preflight_config::load(&config_file)?;

    let config_path = config_path.map(PathBuf::from).unwrap_or(config_file);
    let exec_path = match exec_path {
        Some(path) => PathBuf::from(path),
        None => std::env::current_exe()
            .map_err(|err| format_err!("unable to get executable path - {}", err))?,
    };

    let host = SystemHost;
    let ctx = ProbeContext::new();

    let env = Detector::new(&host, &ctx).detect_or_unknown().await;

    match security::run(&ctx, &host, &security_config, &config_path, &exec_path, &env).await {
        Ok(result) => print_issues(&result, &output_format),
        Err(err) => {
            print_issues(&err.result, &output_format)?;
            Err(err.into())
        }
    }
}

#[api(
    input: {
        properties: {
            "output-format": {
                schema: OUTPUT_FORMAT,
                optional: true,
            },
        }
    }
)]
/// Detect the Proxmox product and version of this host.
async fn detect(param: Value) -> Result<(), Error> {
    let output_format = get_output_format(&param);

    let host = SystemHost;
    let ctx = ProbeContext::new();

    let info = Detector::new(&host, &ctx).detect().await?;

    if output_format == "text" {
        println!("{}", info);
    } else {
        format_and_print_result(&serde_json::to_value(&info)?, &output_format);
    }

    Ok(())
}

#[api(
    input: {
        properties: {
            "output-format": {
                schema: OUTPUT_FORMAT,
                optional: true,
            },
        }
    }
)]
/// Report whether this process runs inside an unprivileged container.
fn container(param: Value) -> Result<(), Error> {
    let output_format = get_output_format(&param);

    let info = detect_unprivileged_container(&SystemHost);

    if output_format == "text" {
        let verdict = if info.detected { "yes" } else { "no" };
        println!("unprivileged container: {}", verdict);
        println!("{}", info.details);
    } else {
        format_and_print_result(&serde_json::to_value(&info)?, &output_format);
    }

    Ok(())
}

#[api(
    input: {
        properties: {
            file: {
                description: "Path to the file.",
                type: String,
            },
            "output-format": {
                schema: OUTPUT_FORMAT,
                optional: true,
            },
        }
    }
)]
/// Print the SHA-256 digest of a file, in the format of the executable hash file.
fn digest(file: String, param: Value) -> Result<(), Error> {
    let output_format = get_output_format(&param);

    let path = Path::new(&file);
    let mut reader = std::fs::File::open(path)
        .map_err(|err| format_err!("unable to open {:?} - {}", path, err))?;
    let digest = preflight_tools::sha::sha256_hex(&mut reader)?;

    if output_format == "text" {
        println!("{}", digest);
    } else {
        format_and_print_result(&json!({ "file": file, "digest": digest }), &output_format);
    }

    Ok(())
}

async fn run() -> Result<(), Error> {
    init_cli_logger("PREFLIGHT_LOG", "info");

    let cmd_def = CliCommandMap::new()
        .insert("check", CliCommand::new(&API_METHOD_CHECK))
        .insert("detect", CliCommand::new(&API_METHOD_DETECT))
        .insert("container", CliCommand::new(&API_METHOD_CONTAINER))
        .insert(
            "digest",
            CliCommand::new(&API_METHOD_DIGEST).arg_param(&["file"]),
        );

    let rpcenv = CliEnvironment::new();

    run_async_cli_command(cmd_def, rpcenv).await; // this call exit(-1) on error

    Ok(())
}

fn main() -> Result<(), Error> {
    proxmox_async::runtime::main(run())
}
