//! Configuration check command: `tion check-config`.

use anyhow::Result;
use tion::config::Config;

fn mask(value: &Option<String>) -> String {
    match value {
        Some(v) if v.chars().count() > 4 => format!("{}****", v.chars().take(4).collect::<String>()),
        Some(_) => "****".to_string(),
        None => "(not set)".to_string(),
    }
}

fn plain(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("(not set)")
}

pub fn cmd_check_config(config: &Config) -> Result<()> {
    println!("Tion configuration");
    println!("  listen:          {}", config.bind_addr());
    println!("  workspace:       {}", config.workspace.display());
    println!("  agent binary:    {}", config.agent_bin);
    println!("  CURSOR_API_KEY:  {}", mask(&config.cursor_api_key));
    match config.agent_timeout {
        Some(t) => println!("  agent timeout:   {}s", t.as_secs()),
        None => println!("  agent timeout:   disabled"),
    }
    println!("  stream buffer:   {} lines", config.stream_buffer);
    println!("  GitHub repo:     {}", plain(&config.github_repo));
    println!("  GitHub token:    {}", mask(&config.github_token));
    println!(
        "  Netlify:         {}",
        if config.is_netlify_configured() { "configured" } else { "not configured" }
    );
    println!("  catalog db:      {}", config.database_path.display());
    println!("  catalog API key: {}", mask(&config.api_key));

    if !config.frontends_dir().is_dir() {
        println!(
            "  warning: {} does not exist",
            config.frontends_dir().display()
        );
    }

    config.validate()?;
    println!("Configuration OK");
    Ok(())
}
