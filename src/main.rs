fn main() -> std::process::ExitCode {
    wsl_portmapper::run()
}
