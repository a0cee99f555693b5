fn main() {
    if let Err(err) = workbench_agent::cli::run_workbench_agent() {
        tracing::error!(error = %err, "workbench-agent failed");
        std::process::exit(1);
    }
}
