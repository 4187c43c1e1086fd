//! 渲染图
//!
//! 每个 pass 声明它读写的 texture，[`RenderGraph::compile`] 据此做拓扑排序：
//! 读取 T 的 pass 排在所有写入 T 的 pass 之后，没有依赖关系的 pass 保持注册顺序。
//! 编译成功后 [`RenderGraph::execute`] 按顺序把同一个 command list 交给每个 pass 录制。

pub mod error;
pub mod graph;
pub mod pass;
pub mod render_graph;

pub use error::RenderGraphError;
pub use pass::RenderGraphPass;
pub use render_graph::RenderGraph;
