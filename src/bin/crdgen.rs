use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = kuberlogic_session::resources::KuberLogicService::crd();

    println!("---");
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
