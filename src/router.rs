use crate::cli::{Cli, Commands};
use crate::commands::{run_fetch, FetchCommandOptions};
use crate::config::{load_config, render_config, ResolvedConfig};
use crate::error::Result;

pub fn run(cli: Cli) -> Result<()> {
    let config = load_config()?;
    let resolved = ResolvedConfig::from_config(&config);

    match cli.command {
        Commands::Fetch {
            url,
            method,
            headers,
            data,
            output,
            append,
            page_ref,
            no_follow,
            max_redirects,
            no_compress,
            max_body_size,
            text_only,
            no_bodies,
        } => {
            let mut capture = resolved.capture.clone();
            if let Some(value) = max_body_size {
                capture.max_body_size = value;
            }
            // An absent flag keeps the configured value.
            if text_only {
                capture.text_only = true;
            }
            if no_bodies {
                capture.bodies = false;
            }

            let options = FetchCommandOptions {
                url,
                method,
                headers,
                data,
                output,
                append,
                page_ref: page_ref.unwrap_or_else(|| capture.page_ref.clone()),
                follow: !no_follow,
                max_redirects: max_redirects.unwrap_or(resolved.fetch.max_redirects),
                compress: resolved.fetch.compress && !no_compress,
                user_agent: resolved.fetch.user_agent.clone(),
                capture: capture.capture_options()?,
                transport: resolved.transport.transport_config(),
            };
            run_fetch(&options)
        }

        Commands::Config => {
            let rendered = render_config(&resolved)?;
            println!("{rendered}");
            Ok(())
        }
    }
}
