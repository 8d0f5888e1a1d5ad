//! ReplicaSet listing through the Kubernetes API

use k8s_openapi::api::apps::v1::ReplicaSet;
use kube::{api::ListParams, Api, Client};
use tracing::debug;

use super::{async_trait, ReplicaSetSource};
use crate::error::CollaboratorError;
use crate::models::{OwnerRef, RawReplicaSetMetadata, REVISION_ANNOTATION};

const SOURCE_NAME: &str = "kubernetes";

/// Lists ReplicaSets with an in-cluster or kubeconfig-derived client
pub struct KubeReplicaSetSource {
    client: Client,
}

impl KubeReplicaSetSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReplicaSetSource for KubeReplicaSetSource {
    async fn list_replica_sets(
        &self,
        namespace: &str,
        deployment: &str,
    ) -> Result<Vec<RawReplicaSetMetadata>, CollaboratorError> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);

        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| match e {
                kube::Error::SerdeError(err) => CollaboratorError::Malformed {
                    source_name: SOURCE_NAME,
                    message: err.to_string(),
                },
                other => CollaboratorError::Unreachable {
                    source_name: SOURCE_NAME,
                    message: other.to_string(),
                },
            })?;

        let owned: Vec<RawReplicaSetMetadata> = list
            .items
            .iter()
            .map(raw_metadata)
            .filter(|rs| rs.is_owned_by(deployment))
            .collect();

        debug!(
            namespace = %namespace,
            deployment = %deployment,
            listed = list.items.len(),
            owned = owned.len(),
            "Listed ReplicaSets"
        );

        Ok(owned)
    }
}

/// Reduce a ReplicaSet object to the metadata rollout selection needs
pub fn raw_metadata(replica_set: &ReplicaSet) -> RawReplicaSetMetadata {
    let meta = &replica_set.metadata;

    RawReplicaSetMetadata {
        name: meta.name.clone(),
        revision_annotation: meta
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(REVISION_ANNOTATION).cloned()),
        owners: meta
            .owner_references
            .as_ref()
            .map(|refs| {
                refs.iter()
                    .map(|r| OwnerRef {
                        kind: r.kind.clone(),
                        name: r.name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        created_at: meta.creation_timestamp.as_ref().map(|t| t.0),
    }
}
