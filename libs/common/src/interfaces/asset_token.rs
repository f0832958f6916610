use alloy_sol_types::sol;

sol! {
    interface IAssetToken {
        function name() external view returns (string memory);

        function symbol() external view returns (string memory);

        function decimals() external view returns (uint8);

        function totalSupply() external view returns (uint256);

        function controller() external view returns (address);

        function balanceOf(address owner) external view returns (uint256);

        function holderCount() external view returns (uint256);

        function holder(uint256 index) external view returns (address);

        function getNumDocs() external view returns (uint256);

        /// `name` is a NUL-padded ASCII string packed into 32 bytes
        function docs(uint256 index) external view returns (bytes32 name, string memory url, bytes32 docHash);

        event Transfer(address indexed from, address indexed to, uint256 value);

        event DocumentAdded(bytes32 name, string url, bytes32 documentHash);

        event DocumentUpdated(bytes32 name, string url, bytes32 documentHash);

        event DocumentRemoved(bytes32 name, string url, bytes32 documentHash);
    }
}
