fn main() -> anyhow::Result<()> {
    docqa_lib::run()
}
