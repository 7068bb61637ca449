pub mod instance;
pub mod device;
pub mod memory;

pub use instance::VulkanInstance;
pub use device::VulkanDevice;
pub use memory::{VulkanMemoryManager, VulkanBuffer};
