fn main() -> anyhow::Result<()> {
    convochat_lib::run()
}
