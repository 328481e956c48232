/*
    mbsrv
    MASSBUS disk and tape drive emulation server

    Copyright 2023-2025 the mbsrv contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    main.rs

    The MASSBUS server daemon. It responds to commands from the bridge
    board and transfers data to and from container files. Pretty easy when
    you think about it like that ...

*/

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use mbsrv::server::{Outcome, Server};

#[derive(Parser)]
#[command(name = "mbsrv", version, about = "MASSBUS disk and tape drive emulation server")]
struct Args {
    /// Execute this command script before reading from the terminal.
    #[arg(long)]
    script: Option<PathBuf>,

    /// Increase logging verbosity (repeat for more).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);
    println!("MASSBUS disk and tape emulator v{}", env!("CARGO_PKG_VERSION"));

    //   There is no bridge board discovery here (yet): buses created by
    // the operator run on offline bridges. The configuration can still be
    // exercised end to end through the command surface and the tests.
    let mut server = Server::new();

    //   If a startup script was given, run it first. A failure to open the
    // script is a fatal startup error.
    if let Some(path) = &args.script {
        let script = match std::fs::read_to_string(path) {
            Ok(script) => script,
            Err(e) => {
                eprintln!("cannot read script {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        };
        for line in script.lines() {
            if server.execute(line) == Outcome::Exit {
                server.shutdown();
                return ExitCode::SUCCESS;
            }
        }
    }

    //   This thread now becomes the operator task, looping over command
    // lines until EXIT (or end of input). Any MASSBUS adapters that get
    // created run their own service threads.
    let stdin = std::io::stdin();
    loop {
        print!("MBS> ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {
                if server.execute(&line) == Outcome::Exit {
                    break;
                }
            }
            Err(e) => {
                log::error!("error reading command input: {}", e);
                break;
            }
        }
    }

    //   Shutdown order is strict: stop the operator surface (done), stop
    // and join every bus service thread, tear down the buses (which
    // detaches the drives), release the bridges, and only then let the
    // logger drain.
    server.shutdown();
    ExitCode::SUCCESS
}
