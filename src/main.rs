use chat_relay::relay_state::{RelayConfig, RelayState};
use chat_relay::server;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "chat-relay",
    about = "Stateless chat relay in front of a hosted text-generation model"
)]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, env = "MODEL_ID", default_value = "us.amazon.nova-lite-v1:0")]
    model_id: String,
    #[arg(long, env = "MAX_TOKENS", default_value_t = 512)]
    max_tokens: u32,
    #[arg(long, env = "TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,
    #[arg(long, env = "TOP_P", default_value_t = 0.9)]
    top_p: f32,
    /// Lambda-style function ARN, used only to resolve the provider region.
    #[arg(long, env = "FUNCTION_ARN")]
    function_arn: Option<String>,
    /// Overrides the regional provider endpoint (e.g. a local stub).
    #[arg(long, env = "PROVIDER_ENDPOINT")]
    provider_endpoint: Option<String>,
    /// Outbound request timeout in seconds.
    #[arg(long, default_value_t = 600)]
    timeout: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = RelayConfig {
        host: args.host,
        port: args.port,
        model_id: args.model_id,
        max_tokens: args.max_tokens,
        temperature: args.temperature,
        top_p: args.top_p,
        function_arn: args.function_arn,
        provider_endpoint: args.provider_endpoint,
        timeout: args.timeout,
    };
    let state = RelayState::new(config.clone());
    actix_web::rt::System::new().block_on(server::startup(config, state))?;
    Ok(())
}
