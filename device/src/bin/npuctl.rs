// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::thread;

use clap::{Parser, Subcommand};

use npu_device::Device;
use npu_protocol::PMU_MAX;
use npu_runtime::{CancelToken, Error, HeapDmaAllocator, LoggingCrashReporter, SendError, Transport};

#[derive(Debug, Parser)]
struct Cli {
    #[arg(long, default_value = "/run/npu0.sock")]
    socket: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a rate-limited health check.
    Ping,
    /// Print the firmware's reported protocol version.
    Version,
    /// Print the firmware's reported hardware/driver capabilities.
    Capabilities,
    /// Allocate a buffer and print its wire-visible device address and size.
    CreateBuffer {
        #[arg(long)]
        size: u32,
    },
    /// Load a network, either by firmware-resident index or from a file of weights.
    CreateNetwork {
        #[arg(long, conflicts_with = "file")]
        index: Option<u32>,
        #[arg(long)]
        file: Option<std::path::PathBuf>,
    },
    /// Query a loaded network's input/output shapes.
    NetworkInfo {
        #[arg(long)]
        network_index: u32,
    },
    /// Submit a synthetic inference and print its final status.
    Infer {
        #[arg(long)]
        network_index: u32,
        #[arg(long, default_value_t = 64)]
        ifm_size: u32,
        #[arg(long, default_value_t = 64)]
        ofm_size: u32,
    },
    /// Submit a synthetic inference and immediately attempt to cancel it.
    Cancel {
        #[arg(long)]
        network_index: u32,
        #[arg(long, default_value_t = 64)]
        ifm_size: u32,
        #[arg(long, default_value_t = 64)]
        ofm_size: u32,
    },
}

/// A `Transport` over a connected Unix stream socket to the rpmsg character device's userspace
/// proxy. Unlike `PipeTransport`, this doesn't track a transmit-slot budget: the CLI has no way
/// to observe the firmware's actual queue depth, so every send is attempted immediately and a
/// full socket buffer surfaces as an ordinary fatal I/O error rather than `NoSlot`.
struct UnixTransport {
    stream: Mutex<UnixStream>,
}

impl Transport for UnixTransport {
    fn try_send(&self, bytes: &[u8]) -> Result<(), SendError> {
        self.stream
            .lock()
            .unwrap()
            .write_all(bytes)
            .map_err(|e| SendError::Fatal(e.to_string()))
    }
}

fn main() -> io::Result<()> {
    env_logger::init();
    let args = Cli::parse();
    eprintln!("{args:?}");

    let write_stream = UnixStream::connect(&args.socket)?;
    let mut read_stream = write_stream.try_clone()?;
    let transport: Arc<dyn Transport> = Arc::new(UnixTransport {
        stream: Mutex::new(write_stream),
    });

    let device = Arc::new(
        Device::open(
            transport,
            Arc::new(HeapDmaAllocator::new()),
            Arc::new(LoggingCrashReporter),
        )
        .map_err(to_io_error)?,
    );

    {
        let device = device.clone();
        thread::spawn(move || {
            let mut buf = vec![0u8; 4096];
            loop {
                match read_stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => device.on_packet(&buf[..n]),
                }
            }
        });
    }

    match args.command {
        Command::Ping => device.ping(&CancelToken::none()).map_err(to_io_error),
        Command::Version => {
            println!("{:#?}", device.driver_version_get());
            Ok(())
        }
        Command::Capabilities => {
            println!("{:#?}", device.capabilities());
            Ok(())
        }
        Command::CreateBuffer { size } => {
            let buffer = device.buffer_create(size).map_err(to_io_error)?;
            println!("{:#?}", buffer.wire_ref());
            Ok(())
        }
        Command::CreateNetwork { index, file } => {
            let network = match (index, file) {
                (Some(index), None) => device.network_create_from_index(index),
                (None, Some(path)) => {
                    let bytes = std::fs::read(path)?;
                    device
                        .network_create_from_buffer(&bytes)
                        .map_err(to_io_error)?
                }
                _ => {
                    return Err(io::Error::other(
                        "exactly one of --index or --file is required",
                    ))
                }
            };
            println!("{:#?}", network.wire_ref());
            Ok(())
        }
        Command::NetworkInfo { network_index } => {
            let network = device.network_create_from_index(network_index);
            let info = device
                .network_info(&network, &CancelToken::none())
                .map_err(to_io_error)?;
            println!("{info:#?}");
            Ok(())
        }
        Command::Infer {
            network_index,
            ifm_size,
            ofm_size,
        } => {
            let network = device.network_create_from_index(network_index);
            let ifm = vec![device.buffer_create(ifm_size).map_err(to_io_error)?];
            let ofm = vec![device.buffer_create(ofm_size).map_err(to_io_error)?];
            let inference = device
                .inference_create(&network, &ifm, &ofm, [0; PMU_MAX], false, &CancelToken::none())
                .map_err(to_io_error)?;
            inference.wait_done(None);
            println!("{:#?}", device.inference_status(&inference));
            Ok(())
        }
        Command::Cancel {
            network_index,
            ifm_size,
            ofm_size,
        } => {
            let network = device.network_create_from_index(network_index);
            let ifm = vec![device.buffer_create(ifm_size).map_err(to_io_error)?];
            let ofm = vec![device.buffer_create(ofm_size).map_err(to_io_error)?];
            let inference = device
                .inference_create(&network, &ifm, &ofm, [0; PMU_MAX], false, &CancelToken::none())
                .map_err(to_io_error)?;
            let outcome = device
                .inference_cancel(&inference, &CancelToken::none())
                .map_err(to_io_error)?;
            println!("cancel outcome: {outcome:?}");
            println!("{:#?}", device.inference_status(&inference));
            Ok(())
        }
    }
}

fn to_io_error(e: Error) -> io::Error {
    io::Error::other(e.to_string())
}
