use hifc_engine::{MAX_CHUNK, MAX_MESSAGE, STREAM_COUNT};
use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Debug, Serialize)]
struct BuildInfo {
    name: &'static str,
    version: &'static str,
    target: &'static str,
    target_os: &'static str,
    target_arch: &'static str,
    git_hash: &'static str,
    features: Features,
    protocol: ProtocolLimits,
}

#[derive(Debug, Serialize)]
struct Features {
    #[serde(rename = "async")]
    async_frames: bool,
    linux_devices: bool,
}

#[derive(Debug, Serialize)]
struct ProtocolLimits {
    max_chunk: usize,
    max_message: usize,
    streams: usize,
}

impl BuildInfo {
    fn current() -> Self {
        Self {
            name: "hifc",
            version: env!("CARGO_PKG_VERSION"),
            target: option_env!("HIFC_BUILD_TARGET").unwrap_or("unknown"),
            target_os: std::env::consts::OS,
            target_arch: std::env::consts::ARCH,
            git_hash: option_env!("GIT_HASH").unwrap_or("unknown"),
            features: Features {
                async_frames: cfg!(feature = "async"),
                linux_devices: cfg!(target_os = "linux"),
            },
            protocol: ProtocolLimits {
                max_chunk: MAX_CHUNK,
                max_message: MAX_MESSAGE,
                streams: STREAM_COUNT,
            },
        }
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    if !args.extended {
        println!("hifc {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let info = BuildInfo::current();
    if matches!(format, OutputFormat::Json) {
        print_json(&info);
        return Ok(SUCCESS);
    }

    println!("{} {} ({})", info.name, info.version, info.git_hash);
    println!("target: {} [{}/{}]", info.target, info.target_os, info.target_arch);
    println!(
        "features: async={} linux_devices={}",
        info.features.async_frames, info.features.linux_devices
    );
    println!(
        "limits: chunk={}B message={}B streams={}",
        info.protocol.max_chunk, info.protocol.max_message, info.protocol.streams
    );
    Ok(SUCCESS)
}
