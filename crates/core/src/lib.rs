// Workflow Execution Core
//
// This crate models a workflow as a directed graph of typed nodes and runs
// single steps of it: resolve a node's inputs against the execution's data
// store, execute the node, record the step output, classify failures.
//
// Key design decisions:
// - Node configs are a closed category -> subtype tagged union with an explicit decode table
// - Unknown or unimplemented node types fail decode instead of defaulting
// - Template resolution is pure and synchronous; only node execution does I/O
// - Collaborators (EntityService, HttpClient) are traits so the core stays storage-agnostic
// - Failures keep distinct shapes (NodeError variants) so classification can decide retryability
// - Walking the graph, retrying, and cancellation belong to the caller (coordinator)

// Node configuration model and per-node execution
pub mod nodes;

// Workflow definitions, graphs, versioned nodes
pub mod model;

// Per-execution state and template resolution
pub mod datastore;
pub mod template;

// Execution contract and step runner
pub mod execution;

// Error taxonomy
pub mod classifier;
pub mod error;

// Collaborators and outbound request guard
pub mod services;
pub mod url_guard;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use classifier::{classify, classify_with_message, ClassifiedError, WorkflowErrorType};
pub use datastore::{
    DataStoreError, ExecutionMetadata, ExecutionPhase, LoopContext, NodeOutput, StepOutput,
    StepStatus, WorkflowDataStore,
};
pub use error::{ConfigError, NodeError};
pub use execution::duration_millis;
pub use execution::{
    ExecutableNode, NodeExecutionContext, NodeInputs, NodeOutputs, NodeServices, StepFailure,
    StepRunner, StepRunnerConfig,
};
pub use model::{
    GraphError, WorkflowDefinition, WorkflowDefinitionStatus, WorkflowDefinitionVersion,
    WorkflowEdge, WorkflowGraph, WorkflowNode,
};
pub use nodes::{NodeCategory, NodeConfig};
pub use services::{
    DeleteEntitiesResult, Entity, EntityService, HttpClient, HttpClientError, OutboundRequest,
    OutboundResponse, ReqwestHttpClient, SaveEntityRequest, ServiceError,
};
pub use template::TemplateError;
pub use url_guard::UrlGuard;
