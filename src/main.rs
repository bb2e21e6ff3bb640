use std::process::ExitCode;

use clap::Parser;

use matouch::{Args, fake_transport, real_transport, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let settings = args.run_settings()?;
        let transport_config = args.transport_config();
        let (command, maybe_fake_args) = args.into_command_and_fake_args();
        let transport = match maybe_fake_args {
            Some(fake_args) => fake_transport(fake_args),
            None => real_transport(transport_config).await?,
        };

        run(command, &mut stdout, transport, settings).await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
