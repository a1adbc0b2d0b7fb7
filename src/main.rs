#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let project_id = std::env::args().nth(1);
    dailies_lib::run(project_id).await
}
