//! Parsing the automation runbook acceptance configurations.

use halyard_config::{parse_manifest, render, ManifestBuilder};
use halyard_core::{Reference, ResourceAddr, Value};

const PS_WORKFLOW_WITH_HASH: &str = r#"
resource "azurerm_resource_group" "test" {
 name = "acctestRG-4711"
 location = "westeurope"
}

resource "azurerm_automation_account" "test" {
  name                = "acctest-4711"
  location            = "${azurerm_resource_group.test.location}"
  resource_group_name = "${azurerm_resource_group.test.name}"
  sku {
        name = "Free"
  }
}

resource "azurerm_automation_runbook" "test" {
  name                = "Get-AzureVMTutorial"
  location            = "${azurerm_resource_group.test.location}"
  resource_group_name = "${azurerm_resource_group.test.name}"

  account_name        = "${azurerm_automation_account.test.name}"
  log_verbose         = "true"
  log_progress        = "true"
  description         = "This is a test runbook for terraform acceptance test"
  runbook_type        = "PowerShellWorkflow"
  publish_content_link {
        uri = "https://raw.githubusercontent.com/Azure/azure-quickstart-templates/master/101-automation-runbook-getvms/Runbooks/Get-AzureVMTutorial.ps1"
	version = "1.0.0.0"
	hash {
		algorithm = "SHA256"
		value = "115775B8FF2BE672D8A946BD0B489918C724DDE15A440373CA54461D53010A80"
	}
  }
}
"#;

#[test]
fn parses_resource_group_account_and_runbook() {
    let manifest = parse_manifest(PS_WORKFLOW_WITH_HASH).expect("parse");

    assert_eq!(
        manifest.addrs(),
        vec![
            ResourceAddr::new("azurerm_resource_group", "test"),
            ResourceAddr::new("azurerm_automation_account", "test"),
            ResourceAddr::new("azurerm_automation_runbook", "test"),
        ]
    );

    let runbook = manifest
        .get(&ResourceAddr::new("azurerm_automation_runbook", "test"))
        .expect("runbook");
    assert_eq!(runbook.attributes["runbook_type"], Value::from("PowerShellWorkflow"));
    assert_eq!(
        runbook.attributes["account_name"],
        Value::Reference(Reference::new("azurerm_automation_account", "test", "name"))
    );

    let link = &runbook.attributes["publish_content_link"]
        .as_blocks()
        .expect("content link block")[0];
    assert_eq!(link["version"], Value::from("1.0.0.0"));
    let hash = &link["hash"].as_blocks().expect("hash block")[0];
    assert_eq!(hash["algorithm"], Value::from("SHA256"));
}

#[test]
fn reference_edges_point_at_parents() {
    let manifest = parse_manifest(PS_WORKFLOW_WITH_HASH).expect("parse");
    let runbook = ResourceAddr::new("azurerm_automation_runbook", "test");

    let mut targets: Vec<String> = manifest
        .references()
        .into_iter()
        .filter(|r| r.source == runbook)
        .map(|r| format!("{} <- {}", r.target, r.field_path))
        .collect();
    targets.sort();

    assert_eq!(
        targets,
        vec![
            "azurerm_automation_account.test <- account_name",
            "azurerm_resource_group.test <- location",
            "azurerm_resource_group.test <- resource_group_name",
        ]
    );
}

#[test]
fn rendered_text_parses_back_to_the_same_manifest() {
    let manifest = parse_manifest(PS_WORKFLOW_WITH_HASH).expect("parse");
    let text = render(&manifest);
    let reparsed = parse_manifest(&text).expect("reparse");
    assert_eq!(reparsed, manifest);
}

#[test]
fn builder_and_text_produce_equal_manifests() {
    let built = ManifestBuilder::new()
        .resource("azurerm_resource_group", "test", |r| {
            r.set("name", "acctestRG-4711").set("location", "westeurope")
        })
        .resource("azurerm_automation_account", "test", |r| {
            r.set("name", "acctest-4711")
                .reference("location", "azurerm_resource_group", "test", "location")
                .reference("resource_group_name", "azurerm_resource_group", "test", "name")
                .block("sku", |b| b.set("name", "Free"))
        })
        .build()
        .expect("build");

    let parsed = parse_manifest(&render(&built)).expect("parse");
    assert_eq!(parsed, built);
}
