use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!(
        "{}",
        serde_yaml::to_string(&keycloak_client_controller::resources::Client::crd())?
    );

    Ok(())
}
